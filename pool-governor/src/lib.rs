//! # Pool Governor
//!
//! Runtime governance for worker-thread pools: registration under a unique identity,
//! per-task execution statistics, periodic health diagnostics, stuck ("decayed") task
//! detection, and monitor lifecycle control per pool or per space.
//!
//! ## Core Components
//!
//! - **Governor**: registry of identities and their monitors, one background scheduler
//! - **GovernedThreadPool / GovernedScheduledPool**: pools composed with instrumentation hooks
//! - **Statistics**: in-flight execution records and average run/queue times
//! - **MonitorTask**: the periodic scan that counts decayed tasks and logs pool counters
//! - **DiagnosticRejectionPolicy**: rate-limited pool dump in front of any rejection policy
//! - **SpaceThreadFactory**: `{space}-{pool}-{index}-thread-{n}` thread names
//!
//! ## Module Organization
//!
//! - [`governor`]: the registry
//! - [`governed`]: instrumented pools and their builders
//! - [`pool`]: the underlying pools, independent of governance
//! - [`monitor`], [`statistics`], [`record`]: diagnostics and their data
//! - [`rejection`], [`naming`]: pool extension points
//! - [`config`], [`logging`]: ambient configuration and log output
//! - [`legacy`]: deprecated free-function aliases

pub mod config;
pub mod governed;
pub mod governor;
pub mod instrument;
pub mod legacy;
pub mod logging;
pub mod monitor;
pub mod naming;
pub mod pool;
pub mod record;
pub mod rejection;
pub mod scheduler;
pub mod statistics;

pub use config::{GovernorConfig, PoolConfig, SharedConfig, identity_of};
pub use governed::{
    GovernedScheduledPool, GovernedThreadPool, ScheduledPoolBuilder, ThreadPoolBuilder,
};
pub use governor::Governor;
pub use instrument::Instrumentation;
pub use logging::{LogSink, MemorySink, TracingSink};
pub use monitor::{Counters, MonitorState, MonitorTask, MonitorWrapper, TickReport};
pub use naming::{DefaultThreadFactory, SpaceThreadFactory};
pub use pool::{
    Runnable, Schedule, ScheduledHandle, ScheduledThreadPool, TaskHandle, TaskOptions, ThreadPool,
    ThreadPoolOptions,
};
pub use record::{ExecutionKey, ExecutionRecord};
pub use rejection::{
    AbortPolicy, CallerRunsPolicy, DEFAULT_DUMP_COOLDOWN, DiagnosticRejectionPolicy, DiscardPolicy,
    RejectionPolicy,
};
pub use statistics::{AVERAGE_UNAVAILABLE, Averages, Statistics};

pub use pool_governor_api::*;
