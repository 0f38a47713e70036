use std::backtrace::Backtrace;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::{ConfigError, TaskError};

pub type TaskResult<T> = Result<T, TaskError>;

/// Unit attached to task timeouts and monitor periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    #[default]
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    fn nanos_per_unit(self) -> u128 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60 * 1_000_000_000,
            TimeUnit::Hours => 3_600 * 1_000_000_000,
            TimeUnit::Days => 86_400 * 1_000_000_000,
        }
    }

    /// Duration of `amount` units, saturating at `Duration::MAX`.
    pub fn to_duration(self, amount: u64) -> Duration {
        let nanos = u128::from(amount) * self.nanos_per_unit();
        let secs = nanos / 1_000_000_000;
        match u64::try_from(secs) {
            Ok(secs) => Duration::new(secs, (nanos % 1_000_000_000) as u32),
            Err(_) => Duration::MAX,
        }
    }

    /// Milliseconds in `amount` units, truncating sub-millisecond remainders.
    pub fn to_millis(self, amount: u64) -> u64 {
        u64::try_from(self.to_duration(amount).as_millis()).unwrap_or(u64::MAX)
    }

    /// Whole units contained in `duration`.
    pub fn convert(self, duration: Duration) -> u64 {
        u64::try_from(duration.as_nanos() / self.nanos_per_unit()).unwrap_or(u64::MAX)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "NANOSECONDS",
            TimeUnit::Microseconds => "MICROSECONDS",
            TimeUnit::Milliseconds => "MILLISECONDS",
            TimeUnit::Seconds => "SECONDS",
            TimeUnit::Minutes => "MINUTES",
            TimeUnit::Hours => "HOURS",
            TimeUnit::Days => "DAYS",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ns" | "nanos" | "nanoseconds" => Ok(TimeUnit::Nanoseconds),
            "us" | "micros" | "microseconds" => Ok(TimeUnit::Microseconds),
            "ms" | "millis" | "milliseconds" => Ok(TimeUnit::Milliseconds),
            "s" | "secs" | "seconds" => Ok(TimeUnit::Seconds),
            "m" | "min" | "minutes" => Ok(TimeUnit::Minutes),
            "h" | "hours" => Ok(TimeUnit::Hours),
            "d" | "days" => Ok(TimeUnit::Days),
            _ => Err(ConfigError::InvalidTimeUnit(s.to_string())),
        }
    }
}

/// Pool-local task sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Metadata describing one task as it moves through a pool.
///
/// The context is created at submission time and handed to [`ExecutionHooks`] before and
/// after the task runs.
///
/// [`ExecutionHooks`]: crate::pool::ExecutionHooks
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Identifier unique within the owning pool
    pub id: TaskId,

    /// Optional human-readable label supplied by the submitter
    pub label: Option<Arc<str>>,

    /// Optional correlation id supplied by the submitter
    pub trace_id: Option<Arc<str>>,

    /// When the task entered the pool queue; `None` for recurring work that is dequeued
    /// exactly when it becomes due
    pub submitted_at: Option<Instant>,

    /// Call stack of the submitting thread, if backtrace capture is enabled
    pub origin: Option<Arc<Backtrace>>,
}

impl TaskContext {
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            label: None,
            trace_id: None,
            submitted_at: None,
            origin: None,
        }
    }

    /// Time spent queued before `started_at`, zero when the pool does not track it.
    pub fn queue_wait(&self, started_at: Instant) -> Duration {
        self.submitted_at
            .map(|submitted| started_at.saturating_duration_since(submitted))
            .unwrap_or_default()
    }
}

impl fmt::Display for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{}({})", label, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}
