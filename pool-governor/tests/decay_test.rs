mod test_helpers;

use std::thread;
use std::time::Duration;

use pool_governor::{TaskOptions, ThreadPoolBuilder, TimeUnit};
use test_helpers::{DEFAULT_WAIT, setup_governor, wait_until};
use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    // Test that a task running past its timeout is counted on every tick but dumped once
    #[test]
    fn test_decayed_task_dumped_once() {
        let (governor, sink) = setup_governor();
        let pool = ThreadPoolBuilder::new("decay")
            .group("slow")
            .core_size(1)
            .max_size(1)
            .task_timeout(2200)
            .monitor_period(1000)
            .time_unit(TimeUnit::Milliseconds)
            .governor(governor)
            .build()
            .unwrap();

        let handle = pool
            .submit_with(
                TaskOptions::new().label("slow-report").trace_id("trace-42"),
                || thread::sleep(Duration::from_millis(4200)),
            )
            .unwrap();
        handle.join().unwrap();

        // Let the tick after completion pass so it sees nothing decayed
        thread::sleep(Duration::from_millis(1100));
        let monitor = pool.monitor().unwrap();
        assert_eq!(monitor.decayed_observations(), 2);
        assert_eq!(monitor.trace_dumps(), 1);

        let warnings = sink.messages_at(Level::WARN);
        let dumps: Vec<_> = warnings
            .iter()
            .filter(|line| {
                line.starts_with("Task slow-report(task-1) in thread pool slow-decay started on ")
            })
            .collect();
        assert_eq!(dumps.len(), 1, "warnings: {:?}", warnings);
        let dump = dumps[0];
        assert!(dump.contains(" with traceId trace-42 "));
        assert!(dump.contains("exceeds the limit of 2200MILLISECONDS execution time"));
        assert!(dump.contains(" with stack trace:\n"));
        assert!(dump.contains("\tat thread 'slow-decay-"));

        // Counters lines report the decayed task while it runs
        assert!(sink.contains("Thread pool 'slow-decay' info: [0,1,0,1,1]"));
        assert!(sink.contains("Thread pool 'slow-decay' info: [0,0,1,1,0]"));
    }

    // Test that a raised timeout stops a running task from being reported
    #[test]
    fn test_timeout_update_applies_to_running_task() {
        let (governor, sink) = setup_governor();
        let pool = ThreadPoolBuilder::new("patient")
            .core_size(1)
            .task_timeout(100)
            .monitor_period(60_000)
            .governor(governor)
            .build()
            .unwrap();

        let (release, gate) = flume::bounded::<()>(0);
        pool.execute(move || {
            let _ = gate.recv();
        })
        .unwrap();
        assert!(wait_until(DEFAULT_WAIT, || pool.statistics().in_flight_count() == 1));
        thread::sleep(Duration::from_millis(150));

        let monitor = pool.monitor().unwrap();
        assert_eq!(monitor.monitor().counters().decayed, 1);

        pool.update_timeout(10_000);
        assert_eq!(monitor.monitor().counters().decayed, 0);
        let report = monitor.monitor().tick();
        assert_eq!(report.dumped, 0);
        assert!(!sink.contains("exceeds the limit"));

        drop(release);
    }
}
