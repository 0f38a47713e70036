use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use pool_governor_api::{
    ConfigError, ExecutionHooks, GovernedPool, NoopHooks, RejectReason, RejectedError, TaskError,
    TaskId, ThreadFactory,
};
use tracing::{debug, error, trace};

use crate::naming::DefaultThreadFactory;
use crate::pool::{Job, Runnable, TaskHandle, TaskOptions, panic_message, with_result};
use crate::rejection::{AbortPolicy, RejectionPolicy};

/// Keep-alive of workers above the core size when none is configured.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Queue capacity when none is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Construction parameters of a [`ThreadPool`].
#[derive(Clone)]
pub struct ThreadPoolOptions {
    /// Workers kept alive even when idle
    pub core_size: usize,

    /// Upper bound on workers, reached only once the queue is full
    pub max_size: usize,

    /// How long a worker above the core size waits for work before exiting
    pub keep_alive: Duration,

    /// Capacity of the task queue
    pub queue_capacity: usize,

    pub thread_factory: Arc<dyn ThreadFactory>,

    /// Handles tasks the pool cannot accept
    pub rejection_policy: Arc<dyn RejectionPolicy>,

    /// Called around every task a worker runs
    pub hooks: Arc<dyn ExecutionHooks>,
}

impl Default for ThreadPoolOptions {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            core_size: cpus,
            max_size: cpus,
            keep_alive: DEFAULT_KEEP_ALIVE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            thread_factory: Arc::new(DefaultThreadFactory::new()),
            rejection_policy: Arc::new(AbortPolicy),
            hooks: Arc::new(NoopHooks),
        }
    }
}

impl fmt::Debug for ThreadPoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolOptions")
            .field("core_size", &self.core_size)
            .field("max_size", &self.max_size)
            .field("keep_alive", &self.keep_alive)
            .field("queue_capacity", &self.queue_capacity)
            .field("thread_factory", &self.thread_factory)
            .field("rejection_policy", &self.rejection_policy)
            .finish()
    }
}

impl ThreadPoolOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 || self.core_size > self.max_size {
            return Err(ConfigError::InvalidPoolSize {
                core: self.core_size,
                max: self.max_size,
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct PoolState {
    /// Dropped on shutdown so idle workers observe a disconnected queue
    sender: Option<Sender<Runnable>>,
    workers: usize,
    largest: usize,
    shutdown: bool,
    terminated: bool,
}

struct Shared {
    options: ThreadPoolOptions,
    state: Mutex<PoolState>,
    termination: Condvar,
    receiver: Receiver<Runnable>,
    active: AtomicUsize,
    completed: AtomicU64,
    next_task_id: AtomicU64,
}

/// A one-shot task pool with core and maximum worker counts.
///
/// ## Submission
/// 1. Below the core size a new worker starts with the task as its first job
/// 2. Otherwise the task is queued
/// 3. With a full queue a worker above the core size starts, up to the maximum
/// 4. Anything else goes to the rejection policy
///
/// ## Workers
/// Workers are plain OS threads from the configured [`ThreadFactory`]. A panicking task is
/// caught, reported to `after_execute`, and the worker moves on to the next task. Workers
/// above the core size exit after `keep_alive` without work.
///
/// Dropping the pool shuts it down; queued tasks still run.
pub struct ThreadPool {
    shared: Arc<Shared>,
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("options", &self.shared.options)
            .field("state", &*self.shared.state.lock())
            .field("active", &self.active_count())
            .field("completed", &self.completed_task_count())
            .finish()
    }
}

impl fmt::Display for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_terminated() {
            "Terminated"
        } else if self.is_shutdown() {
            "Shutting down"
        } else {
            "Running"
        };
        write!(
            f,
            "ThreadPool[{}, pool size = {}, active threads = {}, queued tasks = {}, completed tasks = {}]",
            state,
            self.pool_size(),
            self.active_count(),
            self.queue_size(),
            self.completed_task_count()
        )
    }
}

impl ThreadPool {
    /// Creates a pool. No worker starts until the first submission.
    pub fn new(options: ThreadPoolOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        let (sender, receiver) = flume::bounded(options.queue_capacity);
        Ok(Self {
            shared: Arc::new(Shared {
                options,
                state: Mutex::new(PoolState {
                    sender: Some(sender),
                    workers: 0,
                    largest: 0,
                    shutdown: false,
                    terminated: false,
                }),
                termination: Condvar::new(),
                receiver,
                active: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                next_task_id: AtomicU64::new(1),
            }),
        })
    }

    fn next_id(&self) -> TaskId {
        TaskId(self.shared.next_task_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn execute<F>(&self, task: F) -> Result<TaskId, RejectedError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute_with(TaskOptions::default(), task)
    }

    /// Runs `task` on a worker, tagged with `options`.
    ///
    /// Returns the id the hooks will see, or whatever the rejection policy decided when the
    /// pool cannot take the task.
    pub fn execute_with<F>(&self, options: TaskOptions, task: F) -> Result<TaskId, RejectedError>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id();
        self.dispatch(Runnable::new(options.into_context(id), Box::new(task)))?;
        Ok(id)
    }

    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, RejectedError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit_with(TaskOptions::default(), task)
    }

    /// Runs `task` on a worker and returns a handle to its result.
    pub fn submit_with<T, F>(
        &self,
        options: TaskOptions,
        task: F,
    ) -> Result<TaskHandle<T>, RejectedError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let id = self.next_id();
        let (job, handle) = with_result(id, task);
        self.dispatch(Runnable::new(options.into_context(id), job))?;
        Ok(handle)
    }

    fn dispatch(&self, mut runnable: Runnable) -> Result<(), RejectedError> {
        let shared = &self.shared;
        let core = shared.options.core_size;
        let max = shared.options.max_size;

        let mut state = shared.state.lock();
        let Some(sender) = state.sender.clone() else {
            drop(state);
            return self.reject(runnable, RejectReason::Shutdown);
        };

        if state.workers < core {
            state.reserve_worker();
            drop(state);
            return self.start_worker(Some(runnable));
        }

        runnable.context.submitted_at = Some(Instant::now());
        match sender.try_send(runnable) {
            Ok(()) => {
                if state.workers == 0 {
                    state.reserve_worker();
                    drop(state);
                    return self.start_worker(None);
                }
                Ok(())
            }
            Err(TrySendError::Full(runnable)) if state.workers < max => {
                state.reserve_worker();
                drop(state);
                self.start_worker(Some(runnable))
            }
            Err(TrySendError::Full(runnable)) => {
                drop(state);
                self.reject(runnable, RejectReason::Saturated)
            }
            Err(TrySendError::Disconnected(runnable)) => {
                drop(state);
                self.reject(runnable, RejectReason::Shutdown)
            }
        }
    }

    fn reject(&self, runnable: Runnable, reason: RejectReason) -> Result<(), RejectedError> {
        trace!(task = %runnable.context(), %reason, "Task rejected");
        let policy = Arc::clone(&self.shared.options.rejection_policy);
        policy.rejected(runnable, reason, self)
    }

    /// Spawns a worker whose slot was already reserved under the state lock.
    fn start_worker(&self, first: Option<Runnable>) -> Result<(), RejectedError> {
        let shared = Arc::clone(&self.shared);
        let slot = Arc::new(Mutex::new(first));
        let handoff = Arc::clone(&slot);

        let body = Box::new(move || {
            let first = handoff.lock().take();
            shared.run_worker(first);
        });

        match self.shared.options.thread_factory.new_thread(body) {
            Ok(_) => Ok(()),
            Err(err) => {
                error!(error = %err, "Failed to spawn worker thread");
                self.shared.retire_worker();
                self.shared.try_terminate();
                let first = slot.lock().take();
                match first {
                    Some(runnable) => self.reject(runnable, RejectReason::Saturated),
                    None => Ok(()),
                }
            }
        }
    }

    /// Stops accepting tasks. Queued tasks still run; idle workers exit once the queue drains.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        state.sender = None;
        let idle = state.workers == 0;
        drop(state);
        debug!("Thread pool shutdown requested");
        if idle {
            self.shared.try_terminate();
        }
    }

    /// Shuts down and removes every queued task, returning what was removed.
    ///
    /// Running tasks are not interrupted. Handles of drained submissions resolve to
    /// [`TaskError::Disconnected`].
    pub fn shutdown_now(&self) -> Vec<Runnable> {
        self.shutdown();
        self.shared.receiver.drain().collect()
    }

    /// Waits until the pool terminated or `timeout` elapsed. Returns whether it terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.terminated {
            if self
                .shared
                .termination
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.terminated;
            }
        }
        true
    }

    pub fn queue_capacity(&self) -> usize {
        self.shared.options.queue_capacity
    }

    pub fn keep_alive(&self) -> Duration {
        self.shared.options.keep_alive
    }
}

impl PoolState {
    fn reserve_worker(&mut self) {
        self.workers += 1;
        self.largest = self.largest.max(self.workers);
    }
}

impl Shared {
    fn run_worker(self: Arc<Self>, first: Option<Runnable>) {
        let span = tracing::debug_span!(
            "pool_worker",
            thread = thread::current().name().unwrap_or("unnamed")
        );
        let _entered = span.enter();
        trace!("Worker started");

        let mut next = first;
        loop {
            let runnable = match next.take() {
                Some(runnable) => runnable,
                None => match self.next_task() {
                    Some(runnable) => runnable,
                    None => break,
                },
            };
            self.run_task(runnable);
        }

        trace!("Worker exiting");
        self.try_terminate();
    }

    /// Blocks for the next queued task. `None` means this worker was retired.
    fn next_task(&self) -> Option<Runnable> {
        loop {
            let timed = self.state.lock().workers > self.options.core_size;
            let received = if timed {
                self.receiver.recv_timeout(self.options.keep_alive)
            } else {
                self.receiver
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected)
            };

            match received {
                Ok(runnable) => return Some(runnable),
                Err(RecvTimeoutError::Disconnected) => {
                    self.retire_worker();
                    return None;
                }
                Err(RecvTimeoutError::Timeout) => {
                    // Submissions enqueue under this lock, so an empty queue here stays
                    // empty until the worker count is updated.
                    let mut state = self.state.lock();
                    if state.workers > self.options.core_size && self.receiver.is_empty() {
                        state.workers -= 1;
                        return None;
                    }
                }
            }
        }
    }

    fn run_task(&self, runnable: Runnable) {
        let (context, job): (_, Job) = runnable.into_parts();
        let current = thread::current();

        self.active.fetch_add(1, Ordering::AcqRel);
        self.options.hooks.before_execute(&current, &context);

        let error = panic::catch_unwind(AssertUnwindSafe(job))
            .err()
            .map(|payload| TaskError::Panicked(panic_message(payload.as_ref())));

        self.options.hooks.after_execute(&context, error.as_ref());
        self.active.fetch_sub(1, Ordering::AcqRel);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn retire_worker(&self) {
        let mut state = self.state.lock();
        state.workers = state.workers.saturating_sub(1);
    }

    /// Marks the pool terminated once it is shut down and the last worker left.
    fn try_terminate(&self) {
        let mut state = self.state.lock();
        if !state.shutdown || state.workers > 0 || state.terminated {
            return;
        }
        state.terminated = true;
        drop(state);
        self.termination.notify_all();
        self.options.hooks.terminated();
        debug!("Thread pool terminated");
    }
}

impl GovernedPool for ThreadPool {
    fn pool_size(&self) -> usize {
        self.shared.state.lock().workers
    }

    fn queue_size(&self) -> usize {
        self.shared.receiver.len()
    }

    fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    fn is_terminated(&self) -> bool {
        self.shared.state.lock().terminated
    }

    fn core_pool_size(&self) -> usize {
        self.shared.options.core_size
    }

    fn maximum_pool_size(&self) -> usize {
        self.shared.options.max_size
    }

    fn largest_pool_size(&self) -> usize {
        self.shared.state.lock().largest
    }

    fn completed_task_count(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
