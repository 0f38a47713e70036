mod test_helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use pool_governor::{
    ConfigError, GovernedPool, GovernorError, RejectReason, Schedule, ScheduledPoolBuilder,
    ScheduledThreadPool, TaskOptions,
};
use test_helpers::{DEFAULT_WAIT, QUIET_PERIOD_MS, setup_governor, wait_until};

#[cfg(test)]
mod tests {
    use super::*;

    // Test that a one-shot task runs no earlier than its delay
    #[test]
    fn test_one_shot_delay() {
        let pool = ScheduledThreadPool::new(1).unwrap();
        let (tx, rx) = flume::bounded(1);
        let scheduled_at = Instant::now();
        let handle = pool
            .schedule(Duration::from_millis(100), move || {
                let _ = tx.send(Instant::now());
            })
            .unwrap();

        let ran_at = rx.recv_timeout(DEFAULT_WAIT).unwrap();
        assert!(ran_at.duration_since(scheduled_at) >= Duration::from_millis(100));
        assert!(wait_until(DEFAULT_WAIT, || handle.is_done()));
        assert_eq!(handle.run_count(), 1);
    }

    // Test that fixed-rate tasks repeat until cancelled
    #[test]
    fn test_fixed_rate_until_cancelled() {
        let pool = ScheduledThreadPool::new(2).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let handle = pool
            .schedule_at_fixed_rate(Duration::ZERO, Duration::from_millis(20), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(wait_until(DEFAULT_WAIT, || runs.load(Ordering::SeqCst) >= 5));
        assert!(handle.cancel());
        assert!(handle.is_cancelled());
        thread::sleep(Duration::from_millis(50));
        let after_cancel = runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
    }

    // Test that shutdown stops recurring work but lets pending one-shot tasks run
    #[test]
    fn test_shutdown_semantics() {
        let pool = ScheduledThreadPool::new(1).unwrap();
        let recurring = pool
            .schedule_with_fixed_delay(Duration::from_millis(200), Duration::from_millis(10), || {})
            .unwrap();
        let (tx, rx) = flume::bounded(1);
        pool.schedule(Duration::from_millis(50), move || {
            let _ = tx.send(());
        })
        .unwrap();

        pool.shutdown();
        assert!(recurring.is_cancelled());
        assert_eq!(recurring.run_count(), 0);

        let err = pool.schedule(Duration::ZERO, || {}).unwrap_err();
        assert_eq!(err.reason, RejectReason::Shutdown);

        assert!(rx.recv_timeout(DEFAULT_WAIT).is_ok());
        assert!(pool.await_termination(DEFAULT_WAIT));
        assert!(pool.is_terminated());
    }

    // Test that a governed scheduled pool registers, records runs and reports no queue wait
    #[test]
    fn test_governed_scheduled_pool() {
        let (governor, sink) = setup_governor();
        let pool = ScheduledPoolBuilder::new("cron")
            .group("jobs")
            .core_size(1)
            .monitor_period(QUIET_PERIOD_MS)
            .governor(governor.clone())
            .build()
            .unwrap();
        assert_eq!(governor.identities(), vec!["jobs-cron".to_string()]);
        assert!(sink.contains("Thread pool with name 'jobs-cron' registered"));

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let handle = pool
            .schedule_task(
                TaskOptions::new().label("sweep"),
                Duration::from_millis(10),
                Schedule::FixedRate(Duration::from_millis(30)),
                move || {
                    thread::sleep(Duration::from_millis(5));
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();

        assert!(wait_until(DEFAULT_WAIT, || pool.statistics().completed_count() >= 3));
        handle.cancel();

        assert_eq!(pool.statistics().average_queue_wait_time(), 0);
        assert!(pool.statistics().average_running_time() >= 5);

        let counters = pool.monitor().unwrap().monitor().counters();
        assert_eq!(counters.pool_size, 1);

        pool.shutdown();
        assert!(pool.await_termination(DEFAULT_WAIT));
        assert!(wait_until(DEFAULT_WAIT, || governor.identities().is_empty()));
        assert!(sink.contains("Thread pool with name 'jobs-cron' unregistered"));
    }

    // Test that a panicking recurring task is not run again
    #[test]
    fn test_panicking_recurring_task_stops() {
        let (governor, sink) = setup_governor();
        let pool = ScheduledPoolBuilder::new("flaky")
            .core_size(1)
            .monitor_period(QUIET_PERIOD_MS)
            .governor(governor)
            .build()
            .unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let handle = pool
            .schedule_with_fixed_delay(Duration::ZERO, Duration::from_millis(10), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("flaky job");
            })
            .unwrap();

        assert!(wait_until(DEFAULT_WAIT, || handle.is_done()));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(wait_until(DEFAULT_WAIT, || {
            sink.contains("in thread pool flaky failed: Task panicked: flaky job")
        }));
    }

    // Test that a zero-sized scheduled pool is refused
    #[test]
    fn test_zero_core_size() {
        let (governor, _sink) = setup_governor();
        let built = ScheduledPoolBuilder::new("empty")
            .core_size(0)
            .governor(governor)
            .build();
        assert!(matches!(
            built,
            Err(GovernorError::Config(ConfigError::InvalidPoolSize { core: 0, .. }))
        ));
    }
}
