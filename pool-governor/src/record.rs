use std::backtrace::BacktraceStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{Thread, ThreadId};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use pool_governor_api::{TaskContext, TaskId};

/// Format of the start timestamp printed in diagnostics.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Key of one in-flight execution.
///
/// A thread that finished a task and picks up the next one produces a new key, so records
/// of consecutive tasks on the same worker never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionKey {
    pub task: TaskId,
    pub thread: ThreadId,
}

/// Bookkeeping for a task currently running on a worker thread.
#[derive(Debug)]
pub struct ExecutionRecord {
    key: ExecutionKey,
    task: TaskContext,
    thread_name: Option<String>,
    started_at: Instant,
    started_wall: DateTime<Local>,
    already_dumped: AtomicBool,
}

impl ExecutionRecord {
    pub fn new(thread: &Thread, task: &TaskContext) -> Self {
        Self {
            key: ExecutionKey {
                task: task.id,
                thread: thread.id(),
            },
            task: task.clone(),
            thread_name: thread.name().map(str::to_string),
            started_at: Instant::now(),
            started_wall: Local::now(),
            already_dumped: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> ExecutionKey {
        self.key
    }

    pub fn task(&self) -> &TaskContext {
        &self.task
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.task.trace_id.as_deref()
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn started_on(&self) -> String {
        self.started_wall.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub fn is_dumped(&self) -> bool {
        self.already_dumped.load(Ordering::Acquire)
    }

    /// Marks the record as dumped. Returns `true` only for the call that flipped the flag.
    pub fn mark_dumped(&self) -> bool {
        self.already_dumped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `'name' (ThreadId(n))`, or just the id for unnamed threads.
    pub fn thread_label(&self) -> String {
        match &self.thread_name {
            Some(name) => format!("'{}' ({:?})", name, self.key.thread),
            None => format!("{:?}", self.key.thread),
        }
    }

    /// Stack diagnostic for the owning thread: the worker identity followed by the call stack
    /// that submitted the task, when one was captured.
    pub fn stack_trace(&self) -> String {
        let mut trace = format!("\tat thread {}\n", self.thread_label());
        match self.task.origin.as_deref() {
            Some(origin) if origin.status() == BacktraceStatus::Captured => {
                trace.push_str("\tsubmitted from:\n");
                trace.push_str(&origin.to_string());
            }
            _ => trace.push_str("\tsubmission stack unavailable (set RUST_BACKTRACE=1 to capture)"),
        }
        trace
    }
}
