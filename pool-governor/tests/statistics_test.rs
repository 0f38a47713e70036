mod test_helpers;

use std::thread;
use std::time::Duration;

use pool_governor::{AVERAGE_UNAVAILABLE, ThreadPoolBuilder};
use test_helpers::{DEFAULT_WAIT, QUIET_PERIOD_MS, setup_governor, wait_until};

#[cfg(test)]
mod tests {
    use super::*;

    // Test average run and queue wait over twenty 200 ms tasks on ten workers
    #[test]
    fn test_average_run_and_wait_times() {
        let (governor, _sink) = setup_governor();
        let pool = ThreadPoolBuilder::new("averages")
            .core_size(10)
            .max_size(10)
            .monitor_period(QUIET_PERIOD_MS)
            .governor(governor)
            .build()
            .unwrap();

        let statistics = pool.statistics().clone();
        assert_eq!(statistics.average_running_time(), AVERAGE_UNAVAILABLE);
        assert_eq!(statistics.average_queue_wait_time(), AVERAGE_UNAVAILABLE);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                pool.submit(|| thread::sleep(Duration::from_millis(200)))
                    .unwrap()
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(wait_until(DEFAULT_WAIT, || statistics.completed_count() == 20));

        // Half the tasks start at once, the other half wait one run for a free worker
        let running = statistics.average_running_time();
        let waiting = statistics.average_queue_wait_time();
        assert!((195..=250).contains(&running), "average running time {}", running);
        let expected_wait = running / 2;
        assert!(
            (waiting - expected_wait).abs() <= 30,
            "average queue wait {} expected about {}",
            waiting,
            expected_wait
        );
        assert_eq!(statistics.in_flight_count(), 0);
    }

    // Test that a monitor tick publishes the averages once and resets them
    #[test]
    fn test_tick_resets_averages() {
        let (governor, sink) = setup_governor();
        let pool = ThreadPoolBuilder::new("resetting")
            .core_size(2)
            .monitor_period(QUIET_PERIOD_MS)
            .governor(governor)
            .build()
            .unwrap();

        for _ in 0..4 {
            pool.submit(|| thread::sleep(Duration::from_millis(20)))
                .unwrap()
                .join()
                .unwrap();
        }
        assert!(wait_until(DEFAULT_WAIT, || pool.statistics().completed_count() == 4));

        let monitor = pool.monitor().unwrap();
        let report = monitor.monitor().tick();
        let averages = report.averages.expect("averages emitted");
        assert_eq!(averages.completed, 4);
        assert!(averages.running_millis >= 20);
        assert!(sink.contains("Thread pool 'resetting' average static info: ["));
        assert!(sink.contains("Thread pool 'resetting' info: [0,0,2,2,0]"));

        assert_eq!(pool.statistics().average_running_time(), AVERAGE_UNAVAILABLE);
        assert!(monitor.monitor().tick().averages.is_none());
    }

    // Test that averages stay untouched while the governor is not loggable
    #[test]
    fn test_silent_tick_keeps_averages() {
        let (governor, sink) = setup_governor();
        governor.set_governor_loggable(false);
        let pool = ThreadPoolBuilder::new("silent")
            .core_size(1)
            .monitor_period(QUIET_PERIOD_MS)
            .governor(governor)
            .build()
            .unwrap();

        pool.submit(|| thread::sleep(Duration::from_millis(10)))
            .unwrap()
            .join()
            .unwrap();
        assert!(wait_until(DEFAULT_WAIT, || pool.statistics().completed_count() == 1));

        let report = pool.monitor().unwrap().monitor().tick();
        assert!(report.averages.is_none());
        assert!(pool.statistics().average_running_time() >= 10);
        assert!(!sink.contains("Thread pool 'silent' info"));
    }
}
