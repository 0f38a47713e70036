//! # Worker Pools
//!
//! Two concrete pools that call [`ExecutionHooks`](pool_governor_api::ExecutionHooks) around
//! every task they run:
//!
//! - [`ThreadPool`]: one-shot submissions, core/max workers, bounded FIFO queue
//! - [`ScheduledThreadPool`]: delayed and recurring work pulled from a delay queue
//!
//! Neither pool knows about governance. The instrumented decorators in
//! [`governed`](crate::governed) supply the hooks.

pub mod executor;
pub mod scheduled;

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use pool_governor_api::{TaskContext, TaskError, TaskId, TaskResult};

pub use executor::{ThreadPool, ThreadPoolOptions};
pub use scheduled::{Schedule, ScheduledHandle, ScheduledThreadPool};

/// A unit of work as the pools store it.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Optional metadata attached to a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOptions {
    /// Human-readable label printed in diagnostics instead of the bare task id
    pub label: Option<String>,
    /// Correlation id printed in the decay warning
    pub trace_id: Option<String>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Builds the context of a task submitted now with these options.
    pub(crate) fn into_context(self, id: TaskId) -> TaskContext {
        let mut context = TaskContext::new(id);
        context.label = self.label.map(Arc::from);
        context.trace_id = self.trace_id.map(Arc::from);
        context.origin = capture_origin();
        context
    }
}

/// A job together with the context the hooks see for it.
pub struct Runnable {
    context: TaskContext,
    job: Job,
}

impl fmt::Debug for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runnable").field("context", &self.context).finish()
    }
}

impl Runnable {
    pub fn new(context: TaskContext, job: Job) -> Self {
        Self { context, job }
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    /// Runs the job on the calling thread, bypassing every hook.
    pub fn run(self) {
        (self.job)()
    }

    pub fn into_parts(self) -> (TaskContext, Job) {
        (self.context, self.job)
    }
}

/// Caller-side handle to the result of a submitted task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: TaskId,
    receiver: flume::Receiver<TaskResult<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(id: TaskId, receiver: flume::Receiver<TaskResult<T>>) -> Self {
        Self { id, receiver }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Whether a result is ready or can no longer arrive.
    pub fn is_finished(&self) -> bool {
        !self.receiver.is_empty() || self.receiver.is_disconnected()
    }

    /// Blocks until the task finished.
    ///
    /// A task dropped without running (for instance drained by `shutdown_now`) yields
    /// [`TaskError::Disconnected`].
    pub fn join(self) -> TaskResult<T> {
        self.receiver.recv().map_err(|_| TaskError::Disconnected)?
    }

    /// Like [`join`](Self::join) but gives up after `timeout`.
    pub fn join_timeout(self, timeout: Duration) -> TaskResult<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(flume::RecvTimeoutError::Timeout) => Err(TaskError::Timeout(timeout)),
            Err(flume::RecvTimeoutError::Disconnected) => Err(TaskError::Disconnected),
        }
    }

    /// Awaits the result without blocking an async runtime thread.
    pub async fn join_async(self) -> TaskResult<T> {
        self.receiver
            .recv_async()
            .await
            .map_err(|_| TaskError::Disconnected)?
    }
}

/// Wraps `task` so its value or panic reaches the returned handle.
///
/// A panic is reported to the handle first and then resumed, so the worker still sees it and
/// hands it to `after_execute`.
pub(crate) fn with_result<T, F>(id: TaskId, task: F) -> (Job, TaskHandle<T>)
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (sender, receiver) = flume::bounded(1);
    let job: Job = Box::new(move || {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            Ok(value) => {
                let _ = sender.send(Ok(value));
            }
            Err(payload) => {
                let _ = sender.send(Err(TaskError::Panicked(panic_message(payload.as_ref()))));
                std::panic::resume_unwind(payload);
            }
        }
    });
    (job, TaskHandle::new(id, receiver))
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Stack of the submitting thread, kept only when capture is enabled by `RUST_BACKTRACE`.
pub(crate) fn capture_origin() -> Option<Arc<Backtrace>> {
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => Some(Arc::new(backtrace)),
        _ => None,
    }
}
