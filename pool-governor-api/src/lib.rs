//! # Pool Governor API
//!
//! Interface layer shared by every governed worker-thread pool. A pool that implements the
//! traits in this crate can be registered with a governor, have its task executions
//! instrumented, and be inspected by periodic monitors without the governor knowing which
//! concrete pool implementation runs the tasks.
//!
//! ## Core Components
//!
//! - **GovernedPool**: the read-only observability surface of a pool (sizes, queue depth, state)
//! - **ExecutionHooks**: extension points a pool invokes around every task execution
//! - **ThreadFactory**: source of worker threads and their names
//! - **TaskContext**: metadata describing one task as it moves through a pool
//! - **TimeUnit**: unit attached to task timeouts and monitor periods
//!
//! ## Module Organization
//!
//! - [`pool`]: pool and hook traits
//! - [`thread`]: thread factory trait
//! - [`types`]: task metadata and time units
//! - [`errors`]: error types

pub mod errors;
pub mod pool;
pub mod thread;
pub mod types;

pub use errors::{ConfigError, GovernorError, RejectReason, RejectedError, TaskError};
pub use pool::{ExecutionHooks, GovernedPool, NoopHooks};
pub use thread::ThreadFactory;
pub use types::{TaskContext, TaskId, TaskResult, TimeUnit};
