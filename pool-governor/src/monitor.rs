//! # Pool Monitor
//!
//! Periodic diagnostics for one registered pool.
//!
//! ## Tick
//! 1. Snapshot the in-flight execution records
//! 2. Count records running longer than the task timeout as decayed; dump the stack
//!    diagnostic of each such record the first time it is seen
//! 3. When loggable, emit the counters line and, if tasks completed since the last emitted
//!    averages, the averages line (which also resets the averages)
//!
//! Decay detection and stack dumps never depend on the loggable flag.
//!
//! ## State Machine
//! `Idle -> Scheduled <-> RunningTick`, and `Cancelled` from any state once stopped. A
//! cancelled monitor can be scheduled again.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pool_governor_api::{GovernedPool, TimeUnit};
use tracing::trace;

use crate::config::{PoolConfig, SharedConfig};
use crate::logging::{LogSink, sink_info, sink_warn};
use crate::record::ExecutionRecord;
use crate::scheduler::{MonitorScheduler, PeriodicHandle};
use crate::statistics::{Averages, Statistics};

/// Lifecycle of a [`MonitorTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorState {
    Idle = 0,
    Scheduled = 1,
    RunningTick = 2,
    Cancelled = 3,
}

impl MonitorState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => MonitorState::Scheduled,
            2 => MonitorState::RunningTick,
            3 => MonitorState::Cancelled,
            _ => MonitorState::Idle,
        }
    }
}

/// Pool counters as printed in the info line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    pub queue_size: usize,
    pub executing: usize,
    pub idle: usize,
    pub pool_size: usize,
    pub decayed: usize,
}

/// What one tick observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub counters: Counters,
    /// Stack diagnostics emitted by this tick
    pub dumped: usize,
    /// Averages emitted (and reset) by this tick
    pub averages: Option<Averages>,
}

/// The periodic diagnostic unit of one pool.
pub struct MonitorTask {
    config: SharedConfig,
    statistics: Arc<Statistics>,
    loggable: Arc<AtomicBool>,
    sink: Arc<dyn LogSink>,
    state: AtomicU8,
    decayed_observations: AtomicU64,
    trace_dumps: AtomicU64,
    ticks: AtomicU64,
}

impl fmt::Debug for MonitorTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorTask")
            .field("identity", &self.config.read().identity())
            .field("state", &self.state())
            .field("ticks", &self.ticks())
            .field("decayed_observations", &self.decayed_observations())
            .field("trace_dumps", &self.trace_dumps())
            .finish()
    }
}

impl MonitorTask {
    pub fn new(
        config: SharedConfig,
        statistics: Arc<Statistics>,
        loggable: Arc<AtomicBool>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            config,
            statistics,
            loggable,
            sink,
            state: AtomicU8::new(MonitorState::Idle as u8),
            decayed_observations: AtomicU64::new(0),
            trace_dumps: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> MonitorState {
        MonitorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: MonitorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: MonitorState, to: MonitorState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Sum of decayed tasks over every tick so far.
    pub fn decayed_observations(&self) -> u64 {
        self.decayed_observations.load(Ordering::Acquire)
    }

    /// Stack diagnostics emitted so far.
    pub fn trace_dumps(&self) -> u64 {
        self.trace_dumps.load(Ordering::Acquire)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Current counters without any side effect.
    pub fn counters(&self) -> Counters {
        let timeout = Duration::from_millis(self.config.read().timeout_millis());
        let now = Instant::now();
        let records = self.statistics.snapshot_in_flight();
        let decayed = records
            .iter()
            .filter(|record| record.elapsed(now) >= timeout)
            .count();
        self.counters_for(records.len(), decayed)
    }

    fn counters_for(&self, executing: usize, decayed: usize) -> Counters {
        let pool_size = self.statistics.pool_size();
        Counters {
            queue_size: self.statistics.queue_size(),
            executing,
            idle: pool_size.saturating_sub(executing),
            pool_size,
            decayed,
        }
    }

    /// Runs one scan of the pool.
    pub fn tick(&self) -> TickReport {
        let scheduled = self.transition(MonitorState::Scheduled, MonitorState::RunningTick);

        let (identity, task_timeout, time_unit, timeout_millis) = {
            let config = self.config.read();
            (
                config.identity().to_string(),
                config.task_timeout(),
                config.time_unit(),
                config.timeout_millis(),
            )
        };
        let limit = Duration::from_millis(timeout_millis);
        let now = Instant::now();
        let records = self.statistics.snapshot_in_flight();

        let mut decayed = 0;
        let mut dumped = 0;
        for record in &records {
            if record.elapsed(now) < limit {
                continue;
            }
            decayed += 1;
            if record.mark_dumped() {
                dumped += 1;
                self.dump_decayed(record, &identity, task_timeout, time_unit);
            }
        }

        self.ticks.fetch_add(1, Ordering::AcqRel);
        self.decayed_observations
            .fetch_add(decayed as u64, Ordering::AcqRel);
        self.trace_dumps.fetch_add(dumped as u64, Ordering::AcqRel);

        let counters = self.counters_for(records.len(), decayed);
        let mut averages = None;
        if self.loggable.load(Ordering::Acquire) {
            sink_info!(
                self.sink,
                "Thread pool '{}' info: [{},{},{},{},{}]",
                identity,
                counters.queue_size,
                counters.executing,
                counters.idle,
                counters.pool_size,
                counters.decayed
            );
            averages = self.statistics.take_averages();
            if let Some(averages) = &averages {
                sink_info!(
                    self.sink,
                    "Thread pool '{}' average static info: [{},{}]",
                    identity,
                    averages.queue_wait_millis,
                    averages.running_millis
                );
            }
        }

        if scheduled {
            self.transition(MonitorState::RunningTick, MonitorState::Scheduled);
        }
        TickReport {
            counters,
            dumped,
            averages,
        }
    }

    /// Emits the decay warning of `record`. Failures never escape the tick.
    fn dump_decayed(&self, record: &ExecutionRecord, identity: &str, timeout: u64, unit: TimeUnit) {
        let dumped = panic::catch_unwind(AssertUnwindSafe(|| {
            let trace_id = record
                .trace_id()
                .map(|id| format!(" with traceId {}", id))
                .unwrap_or_default();
            sink_warn!(
                self.sink,
                "Task {} in thread pool {} started on {}{} exceeds the limit of {}{} execution time with stack trace:\n{}",
                record.task(),
                identity,
                record.started_on(),
                trace_id,
                timeout,
                unit,
                record.stack_trace()
            );
        }));
        if dumped.is_err() {
            trace!(identity, "Decay dump failed");
        }
    }
}

/// Everything the governor keeps for one registered identity.
pub struct MonitorWrapper {
    config: SharedConfig,
    statistics: Arc<Statistics>,
    pool: Weak<dyn GovernedPool>,
    task: Arc<MonitorTask>,
    handle: Mutex<Option<PeriodicHandle>>,
    started: AtomicBool,
}

impl fmt::Debug for MonitorWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorWrapper")
            .field("config", &*self.config.read())
            .field("started", &self.is_started())
            .field("task", &self.task)
            .finish()
    }
}

impl MonitorWrapper {
    pub fn new(
        config: SharedConfig,
        statistics: Arc<Statistics>,
        pool: Weak<dyn GovernedPool>,
        loggable: Arc<AtomicBool>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        let task = Arc::new(MonitorTask::new(
            Arc::clone(&config),
            Arc::clone(&statistics),
            loggable,
            sink,
        ));
        Self {
            config,
            statistics,
            pool,
            task,
            handle: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// A snapshot of the pool configuration. Renames go through [`Governor::rename`].
    ///
    /// [`Governor::rename`]: crate::Governor::rename
    pub fn config(&self) -> PoolConfig {
        self.config.read().clone()
    }

    pub(crate) fn shared_config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.statistics
    }

    /// The governed pool, if it is still alive.
    pub fn pool(&self) -> Option<Arc<dyn GovernedPool>> {
        self.pool.upgrade()
    }

    pub fn monitor(&self) -> &Arc<MonitorTask> {
        &self.task
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn decayed_observations(&self) -> u64 {
        self.task.decayed_observations()
    }

    pub fn trace_dumps(&self) -> u64 {
        self.task.trace_dumps()
    }

    /// Schedules the monitor at the config's current period, replacing any previous schedule.
    pub(crate) fn schedule(&self, scheduler: &MonitorScheduler) {
        let period = self.config.read().period_duration();
        let task = Arc::clone(&self.task);
        let mut handle = self.handle.lock();
        if let Some(previous) = handle.take() {
            previous.cancel();
        }
        *handle = Some(scheduler.spawn_periodic(period, move || {
            task.tick();
        }));
        self.task.set_state(MonitorState::Scheduled);
        self.started.store(true, Ordering::Release);
    }

    /// Cancels the schedule. A tick already running completes.
    pub(crate) fn cancel(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.cancel();
        }
        self.task.set_state(MonitorState::Cancelled);
        self.started.store(false, Ordering::Release);
    }
}
