use std::fmt::Debug;
use std::thread::Thread;

use crate::errors::TaskError;
use crate::types::TaskContext;

/// Observability surface every governed pool exposes.
///
/// Monitors and diagnostics only ever read through this trait; they never drive the pool.
pub trait GovernedPool: Debug + Send + Sync {
    /// Number of worker threads currently alive
    fn pool_size(&self) -> usize;

    /// Number of tasks waiting for a worker
    fn queue_size(&self) -> usize;

    /// Number of workers currently running a task
    fn active_count(&self) -> usize;

    /// Whether the pool stopped accepting tasks
    fn is_shutdown(&self) -> bool;

    /// Whether the pool stopped and every worker exited
    fn is_terminated(&self) -> bool;

    fn core_pool_size(&self) -> usize {
        self.pool_size()
    }

    fn maximum_pool_size(&self) -> usize {
        self.pool_size()
    }

    fn largest_pool_size(&self) -> usize {
        self.pool_size()
    }

    /// Tasks that finished, successfully or not, since the pool started
    fn completed_task_count(&self) -> u64 {
        0
    }
}

/// Extension points a pool invokes around task execution.
///
/// Implementations run on the pool's worker threads, so they must be cheap and must never
/// panic back into the worker.
pub trait ExecutionHooks: Send + Sync {
    /// Called on `thread` right before it runs `task`.
    fn before_execute(&self, thread: &Thread, task: &TaskContext);

    /// Called on the same worker thread right after `task` returned or panicked.
    fn after_execute(&self, task: &TaskContext, error: Option<&TaskError>);

    /// Called once when the pool has shut down and its last worker exited.
    fn terminated(&self) {}
}

/// Hooks that observe nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl ExecutionHooks for NoopHooks {
    fn before_execute(&self, _thread: &Thread, _task: &TaskContext) {}

    fn after_execute(&self, _task: &TaskContext, _error: Option<&TaskError>) {}
}
