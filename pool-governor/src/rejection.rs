//! # Rejection Policies
//!
//! What a [`ThreadPool`] does with a task it cannot accept. The basic policies mirror the
//! usual choices (fail, run on the caller, drop). [`DiagnosticRejectionPolicy`] adds a
//! rate-limited pool dump in front of any of them.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pool_governor_api::{GovernedPool, RejectReason, RejectedError};
use tracing::{trace, warn};

use crate::config::SharedConfig;
use crate::logging::{LogSink, sink_warn};
use crate::pool::{Runnable, ThreadPool, panic_message};
use crate::statistics::Statistics;

/// Cooldown between two rejection dumps of the same pool when none is configured.
pub const DEFAULT_DUMP_COOLDOWN: Duration = Duration::from_secs(10);

/// Decides the fate of a task refused by a pool.
///
/// Whatever the policy returns is what the submitter sees.
pub trait RejectionPolicy: fmt::Debug + Send + Sync {
    fn rejected(
        &self,
        task: Runnable,
        reason: RejectReason,
        pool: &ThreadPool,
    ) -> Result<(), RejectedError>;
}

/// Fails the submission with a [`RejectedError`].
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortPolicy;

impl RejectionPolicy for AbortPolicy {
    fn rejected(
        &self,
        task: Runnable,
        reason: RejectReason,
        pool: &ThreadPool,
    ) -> Result<(), RejectedError> {
        Err(RejectedError {
            task: task.context().to_string(),
            pool: pool.to_string(),
            reason,
        })
    }
}

/// Runs the task on the submitting thread, unless the pool is shut down, in which case the
/// task is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct CallerRunsPolicy;

impl RejectionPolicy for CallerRunsPolicy {
    fn rejected(
        &self,
        task: Runnable,
        reason: RejectReason,
        _pool: &ThreadPool,
    ) -> Result<(), RejectedError> {
        if reason == RejectReason::Shutdown {
            trace!(task = %task.context(), "Dropping task of a shut down pool");
            return Ok(());
        }
        let name = task.context().to_string();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
            warn!(
                task = %name,
                panic = %panic_message(payload.as_ref()),
                "Task run by caller panicked"
            );
        }
        Ok(())
    }
}

/// Silently drops the task.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardPolicy;

impl RejectionPolicy for DiscardPolicy {
    fn rejected(
        &self,
        task: Runnable,
        reason: RejectReason,
        _pool: &ThreadPool,
    ) -> Result<(), RejectedError> {
        trace!(task = %task.context(), %reason, "Discarding rejected task");
        Ok(())
    }
}

/// Logs a dump of the exhausted pool at most once per cooldown, then delegates to `inner`.
///
/// The dump carries the pool counters and the stack diagnostic of every in-flight task. The
/// inner policy's outcome is returned unchanged, so backpressure stays exactly what `inner`
/// enforces.
pub struct DiagnosticRejectionPolicy {
    inner: Arc<dyn RejectionPolicy>,
    cooldown: Duration,
    last_dump: Mutex<Option<Instant>>,
    dumps: AtomicU64,
    config: SharedConfig,
    statistics: Arc<Statistics>,
    sink: Arc<dyn LogSink>,
}

impl fmt::Debug for DiagnosticRejectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticRejectionPolicy")
            .field("inner", &self.inner)
            .field("cooldown", &self.cooldown)
            .field("dumps", &self.dump_count())
            .finish()
    }
}

impl DiagnosticRejectionPolicy {
    pub fn new(
        inner: Arc<dyn RejectionPolicy>,
        cooldown: Duration,
        config: SharedConfig,
        statistics: Arc<Statistics>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            inner,
            cooldown,
            last_dump: Mutex::new(None),
            dumps: AtomicU64::new(0),
            config,
            statistics,
            sink,
        }
    }

    /// Number of dumps emitted so far.
    pub fn dump_count(&self) -> u64 {
        self.dumps.load(Ordering::Relaxed)
    }

    /// Claims the right to dump. Only one caller per cooldown window gets `true`.
    fn claim_dump(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last_dump.lock();
        match *last {
            Some(at) if now.saturating_duration_since(at) < self.cooldown => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    fn dump(&self, task: &Runnable, reason: RejectReason, pool: &ThreadPool) {
        let identity = self.config.read().identity().to_string();
        let mut traces = String::new();
        for record in self.statistics.snapshot_in_flight() {
            traces.push_str(&format!(
                "\n{} started on {}:\n{}",
                record.task(),
                record.started_on(),
                record.stack_trace()
            ));
        }
        sink_warn!(
            self.sink,
            "Thread pool '{}' is exhausted! Task {} rejected ({}), pool: [queue: {}/{}, active: {}, pool: {}, core: {}, max: {}, largest: {}], in-flight tasks: {}{}",
            identity,
            task.context(),
            reason,
            pool.queue_size(),
            pool.queue_capacity(),
            pool.active_count(),
            pool.pool_size(),
            pool.core_pool_size(),
            pool.maximum_pool_size(),
            pool.largest_pool_size(),
            self.statistics.in_flight_count(),
            traces
        );
    }
}

impl RejectionPolicy for DiagnosticRejectionPolicy {
    fn rejected(
        &self,
        task: Runnable,
        reason: RejectReason,
        pool: &ThreadPool,
    ) -> Result<(), RejectedError> {
        if self.claim_dump() {
            self.dumps.fetch_add(1, Ordering::Relaxed);
            let dumped = panic::catch_unwind(AssertUnwindSafe(|| self.dump(&task, reason, pool)));
            if dumped.is_err() {
                trace!("Rejection dump failed");
            }
        }
        self.inner.rejected(task, reason, pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::logging::MemorySink;
    use crate::pool::ThreadPoolOptions;
    use std::thread;

    fn saturated_pool(policy: Arc<dyn RejectionPolicy>) -> (ThreadPool, flume::Sender<()>) {
        let pool = ThreadPool::new(ThreadPoolOptions {
            core_size: 1,
            max_size: 1,
            queue_capacity: 1,
            rejection_policy: policy,
            ..Default::default()
        })
        .unwrap();
        let (release_tx, release_rx) = flume::unbounded::<()>();
        pool.execute(move || {
            let _ = release_rx.recv();
        })
        .unwrap();
        pool.execute(|| {}).unwrap();
        (pool, release_tx)
    }

    #[test]
    fn dumps_once_per_window_and_always_delegates() {
        let sink = Arc::new(MemorySink::new());
        let policy = Arc::new(DiagnosticRejectionPolicy::new(
            Arc::new(AbortPolicy),
            Duration::from_secs(60),
            PoolConfig::build("io", "billing", 0, 0, None).into_shared(),
            Arc::new(Statistics::new()),
            sink.clone(),
        ));
        let (pool, release) = saturated_pool(policy.clone());

        let rejected = (0..25).filter(|_| pool.execute(|| {}).is_err()).count();
        assert_eq!(rejected, 25);
        assert_eq!(policy.dump_count(), 1);
        assert_eq!(sink.count_containing("Thread pool 'billing-io' is exhausted!"), 1);
        drop(release);
    }

    #[test]
    fn dumps_again_after_cooldown() {
        let sink = Arc::new(MemorySink::new());
        let policy = Arc::new(DiagnosticRejectionPolicy::new(
            Arc::new(DiscardPolicy),
            Duration::from_millis(20),
            PoolConfig::build("io", "", 0, 0, None).into_shared(),
            Arc::new(Statistics::new()),
            sink.clone(),
        ));
        let (pool, release) = saturated_pool(policy.clone());

        assert!(pool.execute(|| {}).is_ok());
        thread::sleep(Duration::from_millis(40));
        assert!(pool.execute(|| {}).is_ok());
        assert_eq!(policy.dump_count(), 2);
        drop(release);
    }
}
