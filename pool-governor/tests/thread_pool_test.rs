mod test_helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use pool_governor::{
    CallerRunsPolicy, ConfigError, GovernedPool, GovernorError, RejectReason, TaskError,
    TaskOptions, ThreadPool, ThreadPoolBuilder, ThreadPoolOptions,
};
use test_helpers::{DEFAULT_WAIT, QUIET_PERIOD_MS, setup_governor, wait_until};
use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool(core: usize, max: usize, capacity: usize) -> ThreadPool {
        ThreadPool::new(ThreadPoolOptions {
            core_size: core,
            max_size: max,
            keep_alive: Duration::from_millis(50),
            queue_capacity: capacity,
            ..ThreadPoolOptions::default()
        })
        .expect("valid options")
    }

    // Test that invalid sizes are refused before any thread starts
    #[test]
    fn test_invalid_options() {
        let err = ThreadPool::new(ThreadPoolOptions {
            core_size: 4,
            max_size: 2,
            ..ThreadPoolOptions::default()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::InvalidPoolSize { core: 4, max: 2 });

        let err = ThreadPool::new(ThreadPoolOptions {
            queue_capacity: 0,
            ..ThreadPoolOptions::default()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::ZeroQueueCapacity);

        let (governor, _sink) = setup_governor();
        let built = ThreadPoolBuilder::new("broken")
            .core_size(3)
            .max_size(1)
            .governor(governor)
            .build();
        assert!(matches!(
            built,
            Err(GovernorError::Config(ConfigError::InvalidPoolSize { core: 3, max: 1 }))
        ));
    }

    // Test that submitted work runs and results come back through handles
    #[test]
    fn test_submit_and_join() {
        let pool = small_pool(2, 2, 16);
        let handles: Vec<_> = (0..8).map(|i| pool.submit(move || i * i).unwrap()).collect();
        let results: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, vec![0, 1, 4, 9, 16, 25, 36, 49]);
        assert!(wait_until(DEFAULT_WAIT, || pool.completed_task_count() == 8));
        assert_eq!(pool.largest_pool_size(), 2);
    }

    // Test that a panicking task surfaces through its handle and the worker survives
    #[test]
    fn test_panicking_task() {
        let pool = small_pool(1, 1, 4);
        let failing = pool.submit(|| -> u32 { panic!("exploded") }).unwrap();
        assert_eq!(failing.join(), Err(TaskError::Panicked("exploded".to_string())));

        let next = pool.submit(|| 5u32).unwrap();
        assert_eq!(next.join(), Ok(5));
        assert_eq!(pool.pool_size(), 1);
    }

    // Test that a saturated pool rejects with the pool description
    #[test]
    fn test_saturation_rejects() {
        let pool = small_pool(1, 1, 1);
        let (release, gate) = flume::bounded::<()>(0);
        let blocker = gate.clone();
        pool.execute(move || {
            let _ = blocker.recv();
        })
        .unwrap();
        pool.execute(|| {}).unwrap();

        let err = pool.execute(|| {}).unwrap_err();
        assert_eq!(err.reason, RejectReason::Saturated);
        assert!(err.pool.starts_with("ThreadPool[Running, pool size = 1"));

        drop(release);
        pool.shutdown();
        assert!(pool.await_termination(DEFAULT_WAIT));
    }

    // Test that the pool grows above its core size only when the queue is full
    #[test]
    fn test_grows_to_max_and_shrinks_back() {
        let pool = small_pool(1, 3, 1);
        let (release, gate) = flume::bounded::<()>(0);
        for _ in 0..4 {
            let gate = gate.clone();
            pool.execute(move || {
                let _ = gate.recv();
            })
            .unwrap();
        }
        assert_eq!(pool.pool_size(), 3);
        assert_eq!(pool.largest_pool_size(), 3);

        drop(release);
        // Workers above core exit after their keep-alive
        assert!(wait_until(DEFAULT_WAIT, || pool.pool_size() == 1));
    }

    // Test that the caller-runs policy executes overflow on the submitting thread
    #[test]
    fn test_caller_runs_policy() {
        let pool = ThreadPool::new(ThreadPoolOptions {
            core_size: 1,
            max_size: 1,
            queue_capacity: 1,
            rejection_policy: Arc::new(CallerRunsPolicy),
            ..ThreadPoolOptions::default()
        })
        .unwrap();
        let (release, gate) = flume::bounded::<()>(0);
        pool.execute(move || {
            let _ = gate.recv();
        })
        .unwrap();
        pool.execute(|| {}).unwrap();

        let caller = thread::current().id();
        let ran_on = Arc::new(parking_lot::Mutex::new(None));
        let slot = ran_on.clone();
        pool.execute(move || *slot.lock() = Some(thread::current().id()))
            .unwrap();
        assert_eq!(*ran_on.lock(), Some(caller));
        drop(release);
    }

    // Test that shutdown_now drains queued work and resolves its handles as disconnected
    #[test]
    fn test_shutdown_now_drains_queue() {
        let pool = small_pool(1, 1, 8);
        let (release, gate) = flume::bounded::<()>(0);
        pool.execute(move || {
            let _ = gate.recv();
        })
        .unwrap();
        let queued: Vec<_> = (0..3).map(|i| pool.submit(move || i).unwrap()).collect();

        let drained = pool.shutdown_now();
        assert_eq!(drained.len(), 3);
        drop(drained);
        for handle in queued {
            assert_eq!(handle.join(), Err(TaskError::Disconnected));
        }

        let err = pool.execute(|| {}).unwrap_err();
        assert_eq!(err.reason, RejectReason::Shutdown);

        drop(release);
        assert!(pool.await_termination(DEFAULT_WAIT));
        assert!(pool.is_terminated());
    }

    // Test that governed workers carry space-based thread names
    #[test]
    fn test_governed_thread_names() {
        let (governor, _sink) = setup_governor();
        let pool = ThreadPoolBuilder::new("named")
            .group("naming")
            .core_size(2)
            .monitor_period(QUIET_PERIOD_MS)
            .governor(governor)
            .build()
            .unwrap();

        let name = pool
            .submit(|| thread::current().name().map(str::to_string))
            .unwrap()
            .join()
            .unwrap()
            .expect("worker threads are named");
        assert!(name.starts_with("naming-named-"), "unexpected name {}", name);
        assert!(name.contains("-thread-"), "unexpected name {}", name);
    }

    // Test that a failing governed task is logged with its label and statistics stay consistent
    #[test]
    fn test_governed_task_failure_is_logged() {
        let (governor, sink) = setup_governor();
        let pool = ThreadPoolBuilder::new("fragile")
            .core_size(1)
            .monitor_period(QUIET_PERIOD_MS)
            .governor(governor)
            .build()
            .unwrap();

        let handle = pool
            .submit_with(TaskOptions::new().label("parse"), || -> () { panic!("bad input") })
            .unwrap();
        assert!(matches!(handle.join(), Err(TaskError::Panicked(_))));

        assert!(wait_until(DEFAULT_WAIT, || {
            sink.contains("Task parse(task-1) in thread pool fragile failed: Task panicked: bad input")
        }));
        assert_eq!(pool.statistics().completed_count(), 1);
        assert_eq!(pool.statistics().in_flight_count(), 0);
        assert_eq!(sink.messages_at(Level::ERROR).len(), 0);
    }

    // Test that a governed pool counts executing work while it runs
    #[test]
    fn test_governed_counts_in_flight() {
        let (governor, _sink) = setup_governor();
        let pool = ThreadPoolBuilder::new("busy")
            .core_size(2)
            .monitor_period(QUIET_PERIOD_MS)
            .governor(governor)
            .build()
            .unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        let (release, gate) = flume::bounded::<()>(0);
        for _ in 0..2 {
            let started = started.clone();
            let gate = gate.clone();
            pool.execute(move || {
                started.fetch_add(1, Ordering::SeqCst);
                let _ = gate.recv();
            })
            .unwrap();
        }
        assert!(wait_until(DEFAULT_WAIT, || started.load(Ordering::SeqCst) == 2));

        let counters = pool.monitor().unwrap().monitor().counters();
        assert_eq!(counters.executing, 2);
        assert_eq!(counters.pool_size, 2);
        assert_eq!(counters.idle, 0);
        assert_eq!(counters.decayed, 0);

        drop(release);
        assert!(wait_until(DEFAULT_WAIT, || pool.statistics().in_flight_count() == 0));
    }
}
