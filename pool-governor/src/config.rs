use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use pool_governor_api::TimeUnit;

use crate::logging::{LogSink, TracingSink};

/// Task timeout applied when a pool is built with a zero timeout.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);

/// Monitor period applied when a pool is built with a zero period.
pub const DEFAULT_MONITOR_PERIOD: Duration = Duration::from_secs(10);

/// Name of the thread driving monitor ticks when the governor owns its scheduler.
pub const DEFAULT_SCHEDULER_THREAD_NAME: &str = "pool-governor-monitor";

/// Config shared between a pool, its instrumentation and its monitor.
pub type SharedConfig = Arc<RwLock<PoolConfig>>;

/// Identity under which a pool with this `group` and `name` registers.
pub fn identity_of(group: &str, name: &str) -> String {
    if group.is_empty() {
        name.to_string()
    } else {
        format!("{}-{}", group, name)
    }
}

/// `duration` expressed in `unit`, never less than one unit.
fn default_in(unit: TimeUnit, duration: Duration) -> u64 {
    unit.convert(duration).max(1)
}

/// Governance descriptor of one pool.
///
/// `identity` and the derived timeout in milliseconds are recomputed by every mutator, so
/// readers always observe a consistent record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    name: String,
    group: String,
    task_timeout: u64,
    monitor_period: u64,
    time_unit: TimeUnit,
    timeout_millis: u64,
    identity: String,
}

impl PoolConfig {
    /// Builds a config, replacing zero timeout/period with the defaults expressed in the
    /// chosen unit and falling back to milliseconds when no unit is given.
    pub fn build(
        name: impl Into<String>,
        group: impl Into<String>,
        task_timeout: u64,
        monitor_period: u64,
        time_unit: Option<TimeUnit>,
    ) -> Self {
        let time_unit = time_unit.unwrap_or(TimeUnit::Milliseconds);
        let mut config = Self {
            name: name.into(),
            group: group.into(),
            task_timeout: 0,
            monitor_period: 0,
            time_unit,
            timeout_millis: 0,
            identity: String::new(),
        };
        config.update_timeout(task_timeout);
        config.update_period(monitor_period);
        config.refresh_identity();
        config
    }

    fn refresh_identity(&mut self) {
        self.identity = identity_of(&self.group, &self.name);
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.refresh_identity();
    }

    pub fn change_group(&mut self, group: impl Into<String>) {
        self.group = group.into();
        self.refresh_identity();
    }

    /// Sets the monitor period in the config's unit; zero restores the default.
    pub fn update_period(&mut self, monitor_period: u64) {
        self.monitor_period = if monitor_period == 0 {
            default_in(self.time_unit, DEFAULT_MONITOR_PERIOD)
        } else {
            monitor_period
        };
    }

    /// Sets the task timeout in the config's unit; zero restores the default.
    pub fn update_timeout(&mut self, task_timeout: u64) {
        self.task_timeout = if task_timeout == 0 {
            default_in(self.time_unit, DEFAULT_TASK_TIMEOUT)
        } else {
            task_timeout
        };
        self.timeout_millis = self.time_unit.to_millis(self.task_timeout);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn task_timeout(&self) -> u64 {
        self.task_timeout
    }

    pub fn monitor_period(&self) -> u64 {
        self.monitor_period
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    /// Task timeout converted to milliseconds.
    pub fn timeout_millis(&self) -> u64 {
        self.timeout_millis
    }

    pub fn period_duration(&self) -> Duration {
        self.time_unit.to_duration(self.monitor_period)
    }

    pub fn timeout_duration(&self) -> Duration {
        self.time_unit.to_duration(self.task_timeout)
    }

    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

/// Settings of a [`Governor`](crate::governor::Governor).
#[derive(Clone)]
pub struct GovernorConfig {
    /// Whether monitors emit their counters and averages lines
    pub loggable: bool,

    /// Period of the registry self-dump; zero disables it
    pub governor_period: u64,

    /// Unit of `governor_period`
    pub governor_time_unit: TimeUnit,

    /// Name of the thread that runs monitor ticks
    pub scheduler_thread_name: String,

    /// Destination of every line the governor and its monitors emit
    pub sink: Arc<dyn LogSink>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            loggable: true,
            governor_period: 0,
            governor_time_unit: TimeUnit::Milliseconds,
            scheduler_thread_name: DEFAULT_SCHEDULER_THREAD_NAME.to_string(),
            sink: Arc::new(TracingSink),
        }
    }
}

impl fmt::Debug for GovernorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GovernorConfig")
            .field("loggable", &self.loggable)
            .field("governor_period", &self.governor_period)
            .field("governor_time_unit", &self.governor_time_unit)
            .field("scheduler_thread_name", &self.scheduler_thread_name)
            .finish()
    }
}

impl GovernorConfig {
    /// Defaults overridden by `POOL_GOVERNOR_LOGGABLE` and `POOL_GOVERNOR_PERIOD_MS`.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(loggable) = env::var("POOL_GOVERNOR_LOGGABLE")
            .ok()
            .and_then(|v| parse_flag(&v))
        {
            config.loggable = loggable;
        }
        if let Some(period) = env::var("POOL_GOVERNOR_PERIOD_MS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            config.governor_period = period;
            config.governor_time_unit = TimeUnit::Milliseconds;
        }
        config
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_loggable(mut self, loggable: bool) -> Self {
        self.loggable = loggable;
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
