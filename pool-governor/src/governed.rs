//! # Governed Pools
//!
//! Composition of a concrete pool with its governance: a shared [`PoolConfig`], a
//! [`Statistics`] aggregator fed by [`Instrumentation`] hooks, and a registration with a
//! [`Governor`].
//!
//! ## Lifecycle
//! 1. The builder validates its parameters and builds the config
//! 2. The pool is created with the instrumentation hooks
//! 3. The pool registers under its identity, which starts its monitor
//! 4. When the pool terminates, the hooks unregister it
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use pool_governor::{Governor, GovernorConfig, ThreadPoolBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let governor = Governor::new(GovernorConfig::default())?;
//! let pool = ThreadPoolBuilder::new("io")
//!     .group("billing")
//!     .core_size(4)
//!     .task_timeout(30)
//!     .monitor_period(5)
//!     .time_unit_str("seconds")?
//!     .governor(governor)
//!     .build()?;
//!
//! pool.execute(|| std::thread::sleep(Duration::from_millis(10)))?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use pool_governor_api::{
    ConfigError, GovernedPool, GovernorError, RejectedError, TaskId, ThreadFactory, TimeUnit,
};

use crate::config::{PoolConfig, SharedConfig};
use crate::governor::Governor;
use crate::instrument::Instrumentation;
use crate::monitor::MonitorWrapper;
use crate::naming::SpaceThreadFactory;
use crate::pool::executor::{DEFAULT_KEEP_ALIVE, DEFAULT_QUEUE_CAPACITY};
use crate::pool::{
    Runnable, Schedule, ScheduledHandle, ScheduledThreadPool, TaskHandle, TaskOptions,
    ThreadPool, ThreadPoolOptions,
};
use crate::rejection::{
    AbortPolicy, DEFAULT_DUMP_COOLDOWN, DiagnosticRejectionPolicy, RejectionPolicy,
};
use crate::statistics::Statistics;

/// Governance state shared by both governed pool kinds.
struct Governance {
    config: SharedConfig,
    statistics: Arc<Statistics>,
    governor: Arc<Governor>,
}

impl Governance {
    fn new(config: PoolConfig, governor: Option<Arc<Governor>>) -> Result<Self, GovernorError> {
        let governor = match governor {
            Some(governor) => governor,
            None => Governor::global()?,
        };
        Ok(Self {
            config: config.into_shared(),
            statistics: Arc::new(Statistics::new()),
            governor,
        })
    }

    fn hooks(&self) -> Arc<Instrumentation> {
        Arc::new(Instrumentation::new(
            Arc::clone(&self.config),
            Arc::clone(&self.statistics),
            Arc::clone(&self.governor),
        ))
    }

    /// Binds the statistics to `pool` and registers it.
    fn attach(&self, pool: Arc<dyn GovernedPool>) -> bool {
        let weak: Weak<dyn GovernedPool> = Arc::downgrade(&pool);
        self.statistics.bind_pool(weak);
        let identity = self.identity();
        self.governor
            .register(&identity, &pool, &self.config, &self.statistics)
    }

    fn identity(&self) -> String {
        self.config.read().identity().to_string()
    }

    fn rename(&self, pool: Arc<dyn GovernedPool>, mutate: impl FnOnce(&mut PoolConfig)) -> bool {
        self.governor
            .rename(&pool, &self.config, &self.statistics, mutate)
    }

    fn monitor(&self) -> Option<Arc<MonitorWrapper>> {
        self.governor
            .lookup_wrapper(&self.identity())
            .filter(|wrapper| Arc::ptr_eq(wrapper.shared_config(), &self.config))
    }
}

/// Builder for [`GovernedThreadPool`].
pub struct ThreadPoolBuilder {
    name: String,
    group: String,
    core_size: Option<usize>,
    max_size: Option<usize>,
    keep_alive: Duration,
    queue_capacity: usize,
    thread_factory: Option<Arc<dyn ThreadFactory>>,
    rejection_policy: Arc<dyn RejectionPolicy>,
    rejection_cooldown: Option<Duration>,
    task_timeout: u64,
    monitor_period: u64,
    time_unit: Option<TimeUnit>,
    governor: Option<Arc<Governor>>,
}

impl fmt::Debug for ThreadPoolBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolBuilder")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("core_size", &self.core_size)
            .field("max_size", &self.max_size)
            .field("queue_capacity", &self.queue_capacity)
            .field("task_timeout", &self.task_timeout)
            .field("monitor_period", &self.monitor_period)
            .field("time_unit", &self.time_unit)
            .finish()
    }
}

impl ThreadPoolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: String::new(),
            core_size: None,
            max_size: None,
            keep_alive: DEFAULT_KEEP_ALIVE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            thread_factory: None,
            rejection_policy: Arc::new(AbortPolicy),
            rejection_cooldown: None,
            task_timeout: 0,
            monitor_period: 0,
            time_unit: None,
            governor: None,
        }
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Defaults to the number of CPUs.
    pub fn core_size(mut self, core_size: usize) -> Self {
        self.core_size = Some(core_size);
        self
    }

    /// Defaults to the core size.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Defaults to a [`SpaceThreadFactory`] for the pool's group and name.
    pub fn thread_factory(mut self, thread_factory: Arc<dyn ThreadFactory>) -> Self {
        self.thread_factory = Some(thread_factory);
        self
    }

    pub fn rejection_policy(mut self, rejection_policy: Arc<dyn RejectionPolicy>) -> Self {
        self.rejection_policy = rejection_policy;
        self
    }

    /// Wraps the rejection policy in a [`DiagnosticRejectionPolicy`] dumping at most once
    /// per `cooldown`.
    pub fn rejection_diagnostics(mut self, cooldown: Duration) -> Self {
        self.rejection_cooldown = Some(cooldown);
        self
    }

    /// Same as [`rejection_diagnostics`](Self::rejection_diagnostics) with
    /// [`DEFAULT_DUMP_COOLDOWN`].
    pub fn with_rejection_diagnostics(self) -> Self {
        self.rejection_diagnostics(DEFAULT_DUMP_COOLDOWN)
    }

    /// Zero selects the default of 60 seconds, expressed in the time unit.
    pub fn task_timeout(mut self, task_timeout: u64) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    /// Zero selects the default of 10 seconds, expressed in the time unit.
    pub fn monitor_period(mut self, monitor_period: u64) -> Self {
        self.monitor_period = monitor_period;
        self
    }

    pub fn time_unit(mut self, time_unit: TimeUnit) -> Self {
        self.time_unit = Some(time_unit);
        self
    }

    /// Sets the time unit by name, failing on unknown names.
    pub fn time_unit_str(self, time_unit: &str) -> Result<Self, ConfigError> {
        Ok(self.time_unit(time_unit.parse()?))
    }

    /// Defaults to [`Governor::global`].
    pub fn governor(mut self, governor: Arc<Governor>) -> Self {
        self.governor = Some(governor);
        self
    }

    /// Creates the pool and registers it with the governor.
    ///
    /// A duplicate identity does not fail the build: the pool runs unregistered and the
    /// governor logs the rejection.
    pub fn build(self) -> Result<Arc<GovernedThreadPool>, GovernorError> {
        let core_size = self.core_size.unwrap_or_else(num_cpus::get);
        let max_size = self.max_size.unwrap_or(core_size.max(1));

        let config = PoolConfig::build(
            self.name.clone(),
            self.group.clone(),
            self.task_timeout,
            self.monitor_period,
            self.time_unit,
        );
        let governance = Governance::new(config, self.governor)?;

        let rejection_policy: Arc<dyn RejectionPolicy> = match self.rejection_cooldown {
            Some(cooldown) => Arc::new(DiagnosticRejectionPolicy::new(
                self.rejection_policy,
                cooldown,
                Arc::clone(&governance.config),
                Arc::clone(&governance.statistics),
                Arc::clone(governance.governor.sink()),
            )),
            None => self.rejection_policy,
        };
        let thread_factory = self
            .thread_factory
            .unwrap_or_else(|| Arc::new(SpaceThreadFactory::new(&self.group, &self.name)));

        let inner = ThreadPool::new(ThreadPoolOptions {
            core_size,
            max_size,
            keep_alive: self.keep_alive,
            queue_capacity: self.queue_capacity,
            thread_factory,
            rejection_policy,
            hooks: governance.hooks(),
        })?;

        let pool = Arc::new(GovernedThreadPool { inner, governance });
        pool.governance.attach(Arc::clone(&pool) as Arc<dyn GovernedPool>);
        Ok(pool)
    }
}

/// A [`ThreadPool`] whose executions are measured and monitored by a [`Governor`].
pub struct GovernedThreadPool {
    inner: ThreadPool,
    governance: Governance,
}

impl fmt::Debug for GovernedThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GovernedThreadPool")
            .field("identity", &self.governance.identity())
            .field("pool_size", &self.inner.pool_size())
            .field("queue_size", &self.inner.queue_size())
            .field("active", &self.inner.active_count())
            .finish()
    }
}

impl GovernedThreadPool {
    pub fn builder(name: impl Into<String>) -> ThreadPoolBuilder {
        ThreadPoolBuilder::new(name)
    }

    pub fn execute<F>(&self, task: F) -> Result<TaskId, RejectedError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.execute(task)
    }

    pub fn execute_with<F>(&self, options: TaskOptions, task: F) -> Result<TaskId, RejectedError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.execute_with(options, task)
    }

    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, RejectedError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.inner.submit(task)
    }

    pub fn submit_with<T, F>(
        &self,
        options: TaskOptions,
        task: F,
    ) -> Result<TaskHandle<T>, RejectedError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.inner.submit_with(options, task)
    }

    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn shutdown_now(&self) -> Vec<Runnable> {
        self.inner.shutdown_now()
    }

    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.inner.await_termination(timeout)
    }

    pub fn inner(&self) -> &ThreadPool {
        &self.inner
    }

    pub fn identity(&self) -> String {
        self.governance.identity()
    }

    /// Snapshot of the current governance config.
    pub fn config(&self) -> PoolConfig {
        self.governance.config.read().clone()
    }

    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.governance.statistics
    }

    pub fn governor(&self) -> &Arc<Governor> {
        &self.governance.governor
    }

    /// The monitor of this pool, while it is registered.
    pub fn monitor(&self) -> Option<Arc<MonitorWrapper>> {
        self.governance.monitor()
    }

    /// Moves the registration to a new pool name.
    pub fn rename(self: &Arc<Self>, name: &str) -> bool {
        self.governance
            .rename(Arc::clone(self) as Arc<dyn GovernedPool>, |config| config.rename(name))
    }

    /// Moves the registration to a new group.
    pub fn change_group(self: &Arc<Self>, group: &str) -> bool {
        self.governance
            .rename(Arc::clone(self) as Arc<dyn GovernedPool>, |config| config.change_group(group))
    }

    pub fn update_period(&self, monitor_period: u64) {
        self.governance
            .governor
            .update_period(&self.governance.config, monitor_period);
    }

    pub fn update_timeout(&self, task_timeout: u64) {
        self.governance
            .governor
            .update_timeout(&self.governance.config, task_timeout);
    }
}

impl GovernedPool for GovernedThreadPool {
    fn pool_size(&self) -> usize {
        self.inner.pool_size()
    }

    fn queue_size(&self) -> usize {
        self.inner.queue_size()
    }

    fn active_count(&self) -> usize {
        self.inner.active_count()
    }

    fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }

    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    fn core_pool_size(&self) -> usize {
        self.inner.core_pool_size()
    }

    fn maximum_pool_size(&self) -> usize {
        self.inner.maximum_pool_size()
    }

    fn largest_pool_size(&self) -> usize {
        self.inner.largest_pool_size()
    }

    fn completed_task_count(&self) -> u64 {
        self.inner.completed_task_count()
    }
}

/// Builder for [`GovernedScheduledPool`].
pub struct ScheduledPoolBuilder {
    name: String,
    group: String,
    core_size: Option<usize>,
    thread_factory: Option<Arc<dyn ThreadFactory>>,
    task_timeout: u64,
    monitor_period: u64,
    time_unit: Option<TimeUnit>,
    governor: Option<Arc<Governor>>,
}

impl fmt::Debug for ScheduledPoolBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledPoolBuilder")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("core_size", &self.core_size)
            .field("task_timeout", &self.task_timeout)
            .field("monitor_period", &self.monitor_period)
            .field("time_unit", &self.time_unit)
            .finish()
    }
}

impl ScheduledPoolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: String::new(),
            core_size: None,
            thread_factory: None,
            task_timeout: 0,
            monitor_period: 0,
            time_unit: None,
            governor: None,
        }
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn core_size(mut self, core_size: usize) -> Self {
        self.core_size = Some(core_size);
        self
    }

    pub fn thread_factory(mut self, thread_factory: Arc<dyn ThreadFactory>) -> Self {
        self.thread_factory = Some(thread_factory);
        self
    }

    pub fn task_timeout(mut self, task_timeout: u64) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    pub fn monitor_period(mut self, monitor_period: u64) -> Self {
        self.monitor_period = monitor_period;
        self
    }

    pub fn time_unit(mut self, time_unit: TimeUnit) -> Self {
        self.time_unit = Some(time_unit);
        self
    }

    pub fn time_unit_str(self, time_unit: &str) -> Result<Self, ConfigError> {
        Ok(self.time_unit(time_unit.parse()?))
    }

    pub fn governor(mut self, governor: Arc<Governor>) -> Self {
        self.governor = Some(governor);
        self
    }

    pub fn build(self) -> Result<Arc<GovernedScheduledPool>, GovernorError> {
        let core_size = self.core_size.unwrap_or_else(num_cpus::get);
        if core_size == 0 {
            return Err(ConfigError::InvalidPoolSize { core: 0, max: 0 }.into());
        }
        let config = PoolConfig::build(
            self.name.clone(),
            self.group.clone(),
            self.task_timeout,
            self.monitor_period,
            self.time_unit,
        );
        let governance = Governance::new(config, self.governor)?;
        let thread_factory = self
            .thread_factory
            .unwrap_or_else(|| Arc::new(SpaceThreadFactory::new(&self.group, &self.name)));

        let inner = ScheduledThreadPool::with_parts(core_size, thread_factory, governance.hooks())?;
        let pool = Arc::new(GovernedScheduledPool { inner, governance });
        pool.governance.attach(Arc::clone(&pool) as Arc<dyn GovernedPool>);
        Ok(pool)
    }
}

/// A [`ScheduledThreadPool`] whose runs are measured and monitored by a [`Governor`].
///
/// Recurring runs report no queue wait.
pub struct GovernedScheduledPool {
    inner: ScheduledThreadPool,
    governance: Governance,
}

impl fmt::Debug for GovernedScheduledPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GovernedScheduledPool")
            .field("identity", &self.governance.identity())
            .field("pool_size", &self.inner.pool_size())
            .field("queue_size", &self.inner.queue_size())
            .field("active", &self.inner.active_count())
            .finish()
    }
}

impl GovernedScheduledPool {
    pub fn builder(name: impl Into<String>) -> ScheduledPoolBuilder {
        ScheduledPoolBuilder::new(name)
    }

    pub fn schedule<F>(&self, delay: Duration, task: F) -> Result<ScheduledHandle, RejectedError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.schedule(delay, task)
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
        self.inner.schedule_at_fixed_rate(initial_delay, period, task)
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
        self.inner.schedule_with_fixed_delay(initial_delay, delay, task)
    }

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
        self.inner.schedule_task(options, initial_delay, schedule, task)
    }

    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.inner.await_termination(timeout)
    }

    pub fn inner(&self) -> &ScheduledThreadPool {
        &self.inner
    }

    pub fn identity(&self) -> String {
        self.governance.identity()
    }

    pub fn config(&self) -> PoolConfig {
        self.governance.config.read().clone()
    }

    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.governance.statistics
    }

    pub fn governor(&self) -> &Arc<Governor> {
        &self.governance.governor
    }

    pub fn monitor(&self) -> Option<Arc<MonitorWrapper>> {
        self.governance.monitor()
    }

    pub fn rename(self: &Arc<Self>, name: &str) -> bool {
        self.governance
            .rename(Arc::clone(self) as Arc<dyn GovernedPool>, |config| config.rename(name))
    }

    pub fn change_group(self: &Arc<Self>, group: &str) -> bool {
        self.governance
            .rename(Arc::clone(self) as Arc<dyn GovernedPool>, |config| config.change_group(group))
    }

    pub fn update_period(&self, monitor_period: u64) {
        self.governance
            .governor
            .update_period(&self.governance.config, monitor_period);
    }

    pub fn update_timeout(&self, task_timeout: u64) {
        self.governance
            .governor
            .update_timeout(&self.governance.config, task_timeout);
    }
}

impl GovernedPool for GovernedScheduledPool {
    fn pool_size(&self) -> usize {
        self.inner.pool_size()
    }

    fn queue_size(&self) -> usize {
        self.inner.queue_size()
    }

    fn active_count(&self) -> usize {
        self.inner.active_count()
    }

    fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }

    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    fn core_pool_size(&self) -> usize {
        self.inner.core_pool_size()
    }

    fn maximum_pool_size(&self) -> usize {
        self.inner.maximum_pool_size()
    }

    fn completed_task_count(&self) -> u64 {
        self.inner.completed_task_count()
    }
}
