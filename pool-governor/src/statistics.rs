//! # Statistics Aggregator
//!
//! Tracks the tasks a pool is running right now and the running sums needed for average
//! run time and average queue wait.
//!
//! ## Thread Safety
//! - Worker threads call `record_start`/`record_finish` concurrently
//! - Monitor ticks read snapshots concurrently with those writers
//! - The completed count and both sums sit behind one lock, so a reset or a
//!   snapshot-and-reset never observes a half-applied completion

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{Thread, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pool_governor_api::{GovernedPool, TaskContext};

use crate::record::{ExecutionKey, ExecutionRecord};

/// Value returned by the averages when nothing completed since the last reset.
pub const AVERAGE_UNAVAILABLE: i64 = -1;

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    completed: u64,
    running: Duration,
    queue_wait: Duration,
}

impl Totals {
    fn average(sum: Duration, count: u64) -> i64 {
        if count == 0 {
            return AVERAGE_UNAVAILABLE;
        }
        i64::try_from(sum.as_millis() / u128::from(count)).unwrap_or(i64::MAX)
    }
}

/// Timings of one finished execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishedExecution {
    pub running: Duration,
    pub queue_wait: Duration,
}

/// Averages taken (and cleared) in one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Averages {
    /// Completions the averages were computed from
    pub completed: u64,
    /// Average queue wait in milliseconds
    pub queue_wait_millis: i64,
    /// Average run time in milliseconds
    pub running_millis: i64,
}

/// Per-pool execution statistics.
pub struct Statistics {
    in_flight: Mutex<HashMap<ExecutionKey, Arc<ExecutionRecord>>>,
    totals: Mutex<Totals>,
    pool: OnceLock<Weak<dyn GovernedPool>>,
}

impl fmt::Debug for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let totals = *self.totals.lock();
        f.debug_struct("Statistics")
            .field("in_flight", &self.in_flight.lock().len())
            .field("completed", &totals.completed)
            .field("running", &totals.running)
            .field("queue_wait", &totals.queue_wait)
            .finish()
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            totals: Mutex::new(Totals::default()),
            pool: OnceLock::new(),
        }
    }

    /// Attaches the pool whose sizes `queue_size`/`pool_size` report. Only the first call
    /// has an effect.
    pub fn bind_pool(&self, pool: Weak<dyn GovernedPool>) {
        let _ = self.pool.set(pool);
    }

    fn pool(&self) -> Option<Arc<dyn GovernedPool>> {
        self.pool.get().and_then(Weak::upgrade)
    }

    /// Inserts the record for `task` starting now on `thread`.
    pub fn record_start(&self, thread: &Thread, task: &TaskContext) -> Arc<ExecutionRecord> {
        let record = Arc::new(ExecutionRecord::new(thread, task));
        self.in_flight.lock().insert(record.key(), Arc::clone(&record));
        record
    }

    /// Removes the record of `task` on `thread` and folds its timings into the sums.
    ///
    /// Returns `None` when no such record exists, leaving every sum untouched.
    pub fn record_finish(&self, task: &TaskContext, thread: ThreadId) -> Option<FinishedExecution> {
        let key = ExecutionKey { task: task.id, thread };
        let record = self.in_flight.lock().remove(&key)?;

        let finished = FinishedExecution {
            running: record.elapsed(Instant::now()),
            queue_wait: task.queue_wait(record.started_at()),
        };

        let mut totals = self.totals.lock();
        totals.completed += 1;
        totals.running += finished.running;
        totals.queue_wait += finished.queue_wait;
        Some(finished)
    }

    /// Point-in-time copy of the in-flight records.
    pub fn snapshot_in_flight(&self) -> Vec<Arc<ExecutionRecord>> {
        self.in_flight.lock().values().cloned().collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Completions since the last reset.
    pub fn completed_count(&self) -> u64 {
        self.totals.lock().completed
    }

    /// Average run time in milliseconds, or [`AVERAGE_UNAVAILABLE`].
    pub fn average_running_time(&self) -> i64 {
        let totals = *self.totals.lock();
        Totals::average(totals.running, totals.completed)
    }

    /// Average queue wait in milliseconds, or [`AVERAGE_UNAVAILABLE`].
    pub fn average_queue_wait_time(&self) -> i64 {
        let totals = *self.totals.lock();
        Totals::average(totals.queue_wait, totals.completed)
    }

    /// Zeroes the completed count and both sums. In-flight records are kept.
    pub fn reset_averages(&self) {
        *self.totals.lock() = Totals::default();
    }

    /// Returns the current averages and resets them, or `None` when nothing completed.
    pub fn take_averages(&self) -> Option<Averages> {
        let mut totals = self.totals.lock();
        if totals.completed == 0 {
            return None;
        }
        let taken = std::mem::take(&mut *totals);
        Some(Averages {
            completed: taken.completed,
            queue_wait_millis: Totals::average(taken.queue_wait, taken.completed),
            running_millis: Totals::average(taken.running, taken.completed),
        })
    }

    pub fn queue_size(&self) -> usize {
        self.pool().map(|pool| pool.queue_size()).unwrap_or(0)
    }

    pub fn pool_size(&self) -> usize {
        self.pool().map(|pool| pool.pool_size()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pool_governor_api::TaskId;
    use std::thread;

    fn queued_task(id: u64, waited: Duration) -> TaskContext {
        let mut task = TaskContext::new(TaskId(id));
        task.submitted_at = Instant::now().checked_sub(waited);
        task
    }

    #[test]
    fn averages_start_at_sentinel() {
        let stats = Statistics::new();
        assert_eq!(stats.average_running_time(), AVERAGE_UNAVAILABLE);
        assert_eq!(stats.average_queue_wait_time(), AVERAGE_UNAVAILABLE);
        assert!(stats.take_averages().is_none());
    }

    #[test]
    fn finish_removes_record_and_updates_sums() {
        let stats = Statistics::new();
        let current = thread::current();
        let task = queued_task(1, Duration::from_millis(40));

        stats.record_start(&current, &task);
        assert_eq!(stats.in_flight_count(), 1);

        thread::sleep(Duration::from_millis(20));
        let finished = stats.record_finish(&task, current.id()).unwrap();
        assert!(finished.running >= Duration::from_millis(20));
        assert!(finished.queue_wait >= Duration::from_millis(40));

        assert_eq!(stats.in_flight_count(), 0);
        assert_eq!(stats.completed_count(), 1);
        assert!(stats.average_running_time() >= 20);
        assert!(stats.average_queue_wait_time() >= 40);
    }

    #[test]
    fn finish_without_start_is_ignored() {
        let stats = Statistics::new();
        let task = TaskContext::new(TaskId(9));
        assert!(stats.record_finish(&task, thread::current().id()).is_none());
        assert_eq!(stats.completed_count(), 0);
    }

    #[test]
    fn finish_happens_once_per_record() {
        let stats = Statistics::new();
        let current = thread::current();
        let task = TaskContext::new(TaskId(3));
        stats.record_start(&current, &task);
        assert!(stats.record_finish(&task, current.id()).is_some());
        assert!(stats.record_finish(&task, current.id()).is_none());
        assert_eq!(stats.completed_count(), 1);
    }

    #[test]
    fn reset_keeps_in_flight_records() {
        let stats = Statistics::new();
        let current = thread::current();
        let running = TaskContext::new(TaskId(1));
        let done = TaskContext::new(TaskId(2));

        stats.record_start(&current, &running);
        stats.record_start(&current, &done);
        stats.record_finish(&done, current.id());

        stats.reset_averages();
        stats.reset_averages();
        assert_eq!(stats.average_running_time(), AVERAGE_UNAVAILABLE);
        assert_eq!(stats.in_flight_count(), 1);
    }

    #[test]
    fn take_averages_resets_to_sentinel() {
        let stats = Statistics::new();
        let current = thread::current();
        let task = TaskContext::new(TaskId(1));
        stats.record_start(&current, &task);
        stats.record_finish(&task, current.id());

        let averages = stats.take_averages().unwrap();
        assert_eq!(averages.completed, 1);
        // recurring-style context: no submission timestamp, no queue wait
        assert_eq!(averages.queue_wait_millis, 0);
        assert_eq!(stats.average_running_time(), AVERAGE_UNAVAILABLE);
    }

    #[test]
    fn unbound_statistics_report_empty_pool() {
        let stats = Statistics::new();
        assert_eq!(stats.queue_size(), 0);
        assert_eq!(stats.pool_size(), 0);
    }
}
