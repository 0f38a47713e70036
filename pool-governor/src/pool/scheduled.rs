use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use pool_governor_api::{
    ExecutionHooks, GovernedPool, GovernorError, NoopHooks, RejectReason, RejectedError,
    TaskContext, TaskError, TaskId, ThreadFactory,
};
use tracing::{debug, trace, warn};

use crate::naming::DefaultThreadFactory;
use crate::pool::{TaskOptions, panic_message};

/// How a scheduled task repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Runs once after the initial delay
    Once,
    /// Runs every period measured from the previous due time
    FixedRate(Duration),
    /// Runs again the given delay after the previous run finished
    FixedDelay(Duration),
}

type Body = Box<dyn FnMut() + Send + 'static>;

struct ScheduledTask {
    context: TaskContext,
    schedule: Schedule,
    body: Mutex<Body>,
    cancelled: AtomicBool,
    done: AtomicBool,
    runs: AtomicU64,
}

impl ScheduledTask {
    fn is_live(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire) && !self.done.load(Ordering::Acquire)
    }
}

struct Entry {
    due: Instant,
    seq: u64,
    task: Arc<ScheduledTask>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the max-heap yields the earliest due entry first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct DelayQueue {
    heap: BinaryHeap<Entry>,
    seq: u64,
    shutdown: bool,
}

impl DelayQueue {
    fn push(&mut self, due: Instant, task: Arc<ScheduledTask>) {
        self.seq += 1;
        self.heap.push(Entry {
            due,
            seq: self.seq,
            task,
        });
    }
}

struct Shared {
    queue: Mutex<DelayQueue>,
    available: Condvar,
    termination: Condvar,
    hooks: Arc<dyn ExecutionHooks>,
    core_size: usize,
    workers: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    next_task_id: AtomicU64,
    terminated: AtomicBool,
}

/// Handle to a scheduled task.
#[derive(Clone)]
pub struct ScheduledHandle {
    task: Arc<ScheduledTask>,
}

impl fmt::Debug for ScheduledHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledHandle")
            .field("id", &self.task.context.id)
            .field("schedule", &self.task.schedule)
            .field("runs", &self.run_count())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl ScheduledHandle {
    pub fn id(&self) -> TaskId {
        self.task.context.id
    }

    /// Prevents further runs. A run already in progress completes. Returns `false` if the task
    /// was already cancelled or finished.
    pub fn cancel(&self) -> bool {
        if self.task.done.load(Ordering::Acquire) {
            return false;
        }
        !self.task.cancelled.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.cancelled.load(Ordering::Acquire)
    }

    /// Whether the task will never run again: it ran once, panicked, or was cancelled.
    pub fn is_done(&self) -> bool {
        !self.task.is_live()
    }

    pub fn run_count(&self) -> u64 {
        self.task.runs.load(Ordering::Acquire)
    }
}

/// A fixed-size pool running delayed and recurring tasks.
///
/// Workers pull the earliest due task from a shared delay queue. A recurring task is
/// re-queued after each run, so it never runs on two workers at once. A recurring task that
/// panics is not rescheduled.
///
/// Tasks are dequeued exactly when they become due, so their queue wait is never tracked.
///
/// On shutdown pending one-shot tasks still run; recurring tasks stop.
pub struct ScheduledThreadPool {
    shared: Arc<Shared>,
}

impl fmt::Debug for ScheduledThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledThreadPool")
            .field("core_size", &self.shared.core_size)
            .field("workers", &self.pool_size())
            .field("queued", &self.queue_size())
            .field("active", &self.active_count())
            .field("completed", &self.completed_task_count())
            .finish()
    }
}

impl ScheduledThreadPool {
    pub fn new(core_size: usize) -> Result<Self, GovernorError> {
        Self::with_parts(core_size, Arc::new(DefaultThreadFactory::new()), Arc::new(NoopHooks))
    }

    /// Starts `core_size` workers from `thread_factory`, each calling `hooks` around its runs.
    pub fn with_parts(
        core_size: usize,
        thread_factory: Arc<dyn ThreadFactory>,
        hooks: Arc<dyn ExecutionHooks>,
    ) -> Result<Self, GovernorError> {
        let core_size = core_size.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(DelayQueue {
                heap: BinaryHeap::new(),
                seq: 0,
                shutdown: false,
            }),
            available: Condvar::new(),
            termination: Condvar::new(),
            hooks,
            core_size,
            workers: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            next_task_id: AtomicU64::new(1),
            terminated: AtomicBool::new(false),
        });
        let pool = Self { shared };

        for _ in 0..core_size {
            let shared = Arc::clone(&pool.shared);
            shared.workers.fetch_add(1, Ordering::AcqRel);
            let spawned = thread_factory.new_thread(Box::new(move || shared.run_worker()));
            if let Err(err) = spawned {
                pool.shared.workers.fetch_sub(1, Ordering::AcqRel);
                pool.shutdown();
                return Err(GovernorError::ThreadSpawn(err));
            }
        }
        Ok(pool)
    }

    pub fn schedule<F>(&self, delay: Duration, task: F) -> Result<ScheduledHandle, RejectedError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut task = Some(task);
        self.schedule_task(TaskOptions::default(), delay, Schedule::Once, move || {
            if let Some(task) = task.take() {
                task();
            }
        })
    }

    pub fn schedule_at_fixed_rate<F>(
        &self,
        initial_delay: Duration,
        period: Duration,
        task: F,
    ) -> Result<ScheduledHandle, RejectedError>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_task(TaskOptions::default(), initial_delay, Schedule::FixedRate(period), task)
    }

    pub fn schedule_with_fixed_delay<F>(
        &self,
        initial_delay: Duration,
        delay: Duration,
        task: F,
    ) -> Result<ScheduledHandle, RejectedError>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_task(TaskOptions::default(), initial_delay, Schedule::FixedDelay(delay), task)
    }

    /// Queues `task` to first run after `initial_delay`, then per `schedule`.
    pub fn schedule_task<F>(
        &self,
        options: TaskOptions,
        initial_delay: Duration,
        schedule: Schedule,
        task: F,
    ) -> Result<ScheduledHandle, RejectedError>
    where
        F: FnMut() + Send + 'static,
    {
        let id = TaskId(self.shared.next_task_id.fetch_add(1, Ordering::Relaxed));
        let scheduled = Arc::new(ScheduledTask {
            context: options.into_context(id),
            schedule,
            body: Mutex::new(Box::new(task)),
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            runs: AtomicU64::new(0),
        });

        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            drop(queue);
            return Err(RejectedError {
                task: scheduled.context.to_string(),
                pool: format!("{:?}", self),
                reason: RejectReason::Shutdown,
            });
        }
        queue.push(Instant::now() + initial_delay, Arc::clone(&scheduled));
        drop(queue);
        self.shared.available.notify_one();
        Ok(ScheduledHandle { task: scheduled })
    }

    /// Stops accepting tasks and cancels recurring ones. Pending one-shot tasks still run.
    pub fn shutdown(&self) {
        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            return;
        }
        queue.shutdown = true;
        for entry in queue.heap.iter() {
            if entry.task.schedule != Schedule::Once {
                entry.task.cancelled.store(true, Ordering::Release);
            }
        }
        drop(queue);
        debug!("Scheduled thread pool shutdown requested");
        self.shared.available.notify_all();
        self.shared.try_terminate();
    }

    /// Waits until every worker exited or `timeout` elapsed. Returns whether the pool terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.shared.queue.lock();
        while !self.shared.terminated.load(Ordering::Acquire) {
            if self
                .shared
                .termination
                .wait_until(&mut queue, deadline)
                .timed_out()
            {
                return self.shared.terminated.load(Ordering::Acquire);
            }
        }
        true
    }
}

impl Shared {
    fn run_worker(self: Arc<Self>) {
        let span = tracing::debug_span!(
            "scheduled_worker",
            thread = thread::current().name().unwrap_or("unnamed")
        );
        let _entered = span.enter();
        trace!("Worker started");

        while let Some(entry) = self.take() {
            self.run(entry);
        }

        self.workers.fetch_sub(1, Ordering::AcqRel);
        trace!("Worker exiting");
        self.try_terminate();
    }

    /// Blocks until a live task is due. `None` once shut down with nothing left to run.
    fn take(&self) -> Option<Entry> {
        let mut queue = self.queue.lock();
        loop {
            let head = queue
                .heap
                .peek()
                .map(|entry| (entry.due, entry.task.is_live()));
            match head {
                None if queue.shutdown => return None,
                None => self.available.wait(&mut queue),
                Some((_, false)) => {
                    queue.heap.pop();
                }
                Some((due, true)) if due <= Instant::now() => return queue.heap.pop(),
                Some((due, true)) => {
                    self.available.wait_until(&mut queue, due);
                }
            }
        }
    }

    fn run(&self, entry: Entry) {
        let Entry { due, task, .. } = entry;
        let current = thread::current();

        self.active.fetch_add(1, Ordering::AcqRel);
        self.hooks.before_execute(&current, &task.context);

        let outcome = {
            let mut body = task.body.lock();
            panic::catch_unwind(AssertUnwindSafe(|| (*body)()))
        };
        let error = outcome
            .err()
            .map(|payload| TaskError::Panicked(panic_message(payload.as_ref())));

        self.hooks.after_execute(&task.context, error.as_ref());
        self.active.fetch_sub(1, Ordering::AcqRel);
        self.completed.fetch_add(1, Ordering::Relaxed);
        task.runs.fetch_add(1, Ordering::AcqRel);

        if let Some(error) = &error {
            warn!(task = %task.context, %error, "Scheduled task failed and will not run again");
        }

        let next_due = match task.schedule {
            _ if error.is_some() => None,
            Schedule::Once => None,
            Schedule::FixedRate(period) => Some(due + period),
            Schedule::FixedDelay(delay) => Some(Instant::now() + delay),
        };

        let mut queue = self.queue.lock();
        match next_due {
            Some(next_due) if !queue.shutdown && task.is_live() => {
                queue.push(next_due, task);
                drop(queue);
                self.available.notify_one();
            }
            _ => task.done.store(true, Ordering::Release),
        }
    }

    fn try_terminate(&self) {
        let queue = self.queue.lock();
        if !queue.shutdown || self.workers.load(Ordering::Acquire) > 0 {
            return;
        }
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(queue);
        self.termination.notify_all();
        self.hooks.terminated();
        debug!("Scheduled thread pool terminated");
    }
}

impl GovernedPool for ScheduledThreadPool {
    fn pool_size(&self) -> usize {
        self.shared.workers.load(Ordering::Acquire)
    }

    fn queue_size(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }

    fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    fn is_shutdown(&self) -> bool {
        self.shared.queue.lock().shutdown
    }

    fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::Acquire)
    }

    fn core_pool_size(&self) -> usize {
        self.shared.core_size
    }

    fn maximum_pool_size(&self) -> usize {
        self.shared.core_size
    }

    fn completed_task_count(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }
}

impl Drop for ScheduledThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
