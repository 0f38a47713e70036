//! # Governor Registry
//!
//! Maps pool identities to their monitors and drives every monitor from one background
//! scheduler.
//!
//! ## Key Responsibilities
//! - Enforcing identity uniqueness across registered pools
//! - Starting, stopping and rescheduling monitors per identity or per space
//! - Re-registering pools atomically when their identity changes
//! - Owning the process-wide loggable flag and the registry self-dump
//!
//! ## Failure Semantics
//! Steady-state operations never return errors. Unknown identities, unknown spaces and
//! duplicate names are reported through the log sink and leave the registry untouched; the
//! `bool`/count results only tell whether something changed.
//!
//! ## Lock Order
//! The registry lock is always taken before any pool config lock, so renames, timeout or
//! period updates, and unregistration of the same pool are serialized.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lazy_static::lazy_static;
use parking_lot::Mutex;
use pool_governor_api::{GovernedPool, GovernorError, TimeUnit};
use tokio::runtime::Handle;

use crate::config::{GovernorConfig, PoolConfig, SharedConfig};
use crate::logging::{LogSink, sink_error, sink_info, sink_warn};
use crate::monitor::MonitorWrapper;
use crate::scheduler::{MonitorScheduler, PeriodicHandle};
use crate::statistics::Statistics;

/// Group label used in the log lines of space-wide operations.
const GROUP_KIND: &str = "space";

type Registry = Mutex<HashMap<String, Arc<MonitorWrapper>>>;

lazy_static! {
    static ref GLOBAL: Mutex<Option<Arc<Governor>>> = Mutex::new(None);
}

/// Registry of governed pools and their monitors.
///
/// Create one with [`Governor::new`] and hand it to the pools it should govern, or use the
/// lazily created process-wide instance from [`Governor::global`].
pub struct Governor {
    registry: Arc<Registry>,
    scheduler: MonitorScheduler,
    loggable: Arc<AtomicBool>,
    sink: Arc<dyn LogSink>,
    dumper: Mutex<Option<PeriodicHandle>>,
}

impl fmt::Debug for Governor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Governor")
            .field("identities", &self.identities())
            .field("loggable", &self.is_governor_loggable())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl Governor {
    /// Creates a governor with its own monitor scheduler thread.
    pub fn new(config: GovernorConfig) -> Result<Arc<Self>, GovernorError> {
        let scheduler = MonitorScheduler::new(&config.scheduler_thread_name)?;
        Ok(Self::with_scheduler(config, scheduler))
    }

    /// Creates a governor whose monitors run on an existing tokio runtime.
    pub fn with_runtime_handle(config: GovernorConfig, handle: Handle) -> Arc<Self> {
        Self::with_scheduler(config, MonitorScheduler::with_handle(handle))
    }

    fn with_scheduler(config: GovernorConfig, scheduler: MonitorScheduler) -> Arc<Self> {
        let governor = Arc::new(Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            scheduler,
            loggable: Arc::new(AtomicBool::new(config.loggable)),
            sink: config.sink,
            dumper: Mutex::new(None),
        });
        if config.governor_period > 0 {
            governor.set_governor_period(config.governor_period, config.governor_time_unit);
        }
        governor
    }

    /// The process-wide governor, created from [`GovernorConfig::from_env`] on first use.
    pub fn global() -> Result<Arc<Self>, GovernorError> {
        let mut global = GLOBAL.lock();
        if let Some(governor) = global.as_ref() {
            return Ok(Arc::clone(governor));
        }
        let governor = Self::new(GovernorConfig::from_env())?;
        *global = Some(Arc::clone(&governor));
        Ok(governor)
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    /// Registers `pool` under `identity` and starts its monitor.
    ///
    /// A blank or already registered identity is logged and ignored; an existing registration
    /// is never replaced.
    pub fn register(
        &self,
        identity: &str,
        pool: &Arc<dyn GovernedPool>,
        config: &SharedConfig,
        statistics: &Arc<Statistics>,
    ) -> bool {
        let mut registry = self.registry.lock();
        self.register_locked(&mut registry, identity, pool, config, statistics)
    }

    fn register_locked(
        &self,
        registry: &mut HashMap<String, Arc<MonitorWrapper>>,
        identity: &str,
        pool: &Arc<dyn GovernedPool>,
        config: &SharedConfig,
        statistics: &Arc<Statistics>,
    ) -> bool {
        if identity.trim().is_empty() {
            sink_error!(
                self.sink,
                "Rejected registering request of instance {:?} with blank name",
                pool
            );
            return false;
        }
        if registry.contains_key(identity) {
            sink_error!(
                self.sink,
                "Rejected registering request of instance {:?} with duplicate name: {}",
                pool,
                identity
            );
            return false;
        }

        let wrapper = Arc::new(MonitorWrapper::new(
            Arc::clone(config),
            Arc::clone(statistics),
            Arc::downgrade(pool),
            Arc::clone(&self.loggable),
            Arc::clone(&self.sink),
        ));
        registry.insert(identity.to_string(), Arc::clone(&wrapper));
        sink_info!(self.sink, "Thread pool with name '{}' registered", identity);
        self.start_wrapper(identity, &wrapper);
        true
    }

    /// Removes the registration backed by `config` and cancels its monitor.
    ///
    /// Does nothing when the identity is absent or registered by a different pool.
    pub fn unregister(&self, config: &SharedConfig) -> bool {
        let mut registry = self.registry.lock();
        let identity = config.read().identity().to_string();
        let owned = registry
            .get(&identity)
            .is_some_and(|wrapper| Arc::ptr_eq(wrapper.shared_config(), config));
        if !owned {
            return false;
        }
        self.remove_locked(&mut registry, &identity)
    }

    /// Removes whatever is registered under `identity`.
    pub fn unregister_identity(&self, identity: &str) -> bool {
        let mut registry = self.registry.lock();
        self.remove_locked(&mut registry, identity)
    }

    fn remove_locked(
        &self,
        registry: &mut HashMap<String, Arc<MonitorWrapper>>,
        identity: &str,
    ) -> bool {
        match registry.remove(identity) {
            Some(wrapper) => {
                wrapper.cancel();
                sink_info!(self.sink, "Thread pool with name '{}' unregistered", identity);
                true
            }
            None => false,
        }
    }

    fn start_wrapper(&self, identity: &str, wrapper: &MonitorWrapper) -> bool {
        let (period, unit) = period_of(wrapper);
        if wrapper.is_started() {
            sink_warn!(
                self.sink,
                "Thread pool '{}' already started with period: {} {}",
                identity,
                period,
                unit
            );
            return false;
        }
        wrapper.schedule(&self.scheduler);
        sink_info!(
            self.sink,
            "Thread pool '{}' started with period: {} {}",
            identity,
            period,
            unit
        );
        true
    }

    fn stop_wrapper(&self, identity: &str, wrapper: &MonitorWrapper) -> bool {
        if !wrapper.is_started() {
            sink_warn!(self.sink, "Thread pool '{}' is not scheduling!", identity);
            return false;
        }
        wrapper.cancel();
        sink_info!(self.sink, "Thread pool '{}' stopped.", identity);
        true
    }

    fn reschedule_wrapper(&self, identity: &str, wrapper: &MonitorWrapper) -> bool {
        if !wrapper.is_started() {
            sink_warn!(self.sink, "Thread pool '{}' is not scheduling!", identity);
            return false;
        }
        wrapper.schedule(&self.scheduler);
        let (period, unit) = period_of(wrapper);
        sink_info!(
            self.sink,
            "Restart thread pool '{}' with period: {} {}",
            identity,
            period,
            unit
        );
        true
    }

    fn with_wrapper(&self, identity: &str, action: impl FnOnce(&MonitorWrapper) -> bool) -> bool {
        let registry = self.registry.lock();
        match registry.get(identity) {
            Some(wrapper) => action(wrapper),
            None => {
                sink_error!(
                    self.sink,
                    "Thread pool with name '{}' is not registered yet",
                    identity
                );
                false
            }
        }
    }

    pub fn start_monitor(&self, identity: &str) -> bool {
        self.with_wrapper(identity, |wrapper| self.start_wrapper(identity, wrapper))
    }

    pub fn stop_monitor(&self, identity: &str) -> bool {
        self.with_wrapper(identity, |wrapper| self.stop_wrapper(identity, wrapper))
    }

    /// Restarts a running monitor at its config's current period.
    pub fn reschedule(&self, identity: &str) -> bool {
        self.with_wrapper(identity, |wrapper| self.reschedule_wrapper(identity, wrapper))
    }

    fn for_space(
        &self,
        group: &str,
        mut action: impl FnMut(&str, &MonitorWrapper) -> bool,
    ) -> Option<usize> {
        let registry = self.registry.lock();
        let mut members: Vec<(&String, &Arc<MonitorWrapper>)> = registry
            .iter()
            .filter(|(_, wrapper)| wrapper.shared_config().read().group() == group)
            .collect();
        if members.is_empty() {
            sink_error!(
                self.sink,
                "Thread pool with {} '{}' is not registered yet",
                GROUP_KIND,
                group
            );
            return None;
        }
        members.sort_by(|a, b| a.0.cmp(b.0));
        let mut changed = 0;
        for (identity, wrapper) in members {
            if action(identity, wrapper) {
                changed += 1;
            }
        }
        Some(changed)
    }

    /// Starts every stopped monitor of `group`. Returns how many were started.
    pub fn start_space(&self, group: &str) -> usize {
        let started =
            self.for_space(group, |identity, wrapper| self.start_wrapper(identity, wrapper));
        let Some(started) = started else {
            return 0;
        };
        sink_info!(self.sink, "Thread pool with {} '{}' started", GROUP_KIND, group);
        started
    }

    /// Stops every running monitor of `group`. Returns how many were stopped.
    pub fn stop_space(&self, group: &str) -> usize {
        let stopped =
            self.for_space(group, |identity, wrapper| self.stop_wrapper(identity, wrapper));
        let Some(stopped) = stopped else {
            return 0;
        };
        sink_info!(self.sink, "Thread pool with {} '{}' stopped", GROUP_KIND, group);
        stopped
    }

    /// Sets `period` on every pool of `group` and restarts its running monitors. Returns how
    /// many monitors were restarted.
    pub fn reschedule_space(&self, group: &str, period: u64) -> usize {
        let Some(restarted) = self.for_space(group, |identity, wrapper| {
            wrapper.shared_config().write().update_period(period);
            wrapper.is_started() && self.reschedule_wrapper(identity, wrapper)
        }) else {
            return 0;
        };
        sink_info!(
            self.sink,
            "Thread pool with {} '{}' rescheduled with period '{}'",
            GROUP_KIND,
            group,
            period
        );
        restarted
    }

    /// Applies `mutate` to a pool's config and moves its registration to the resulting
    /// identity in one step.
    ///
    /// When the new identity is blank or taken, the config is left untouched and the pool
    /// keeps its old registration. A pool that was not registered gets registered under the
    /// new identity.
    pub fn rename(
        &self,
        pool: &Arc<dyn GovernedPool>,
        config: &SharedConfig,
        statistics: &Arc<Statistics>,
        mutate: impl FnOnce(&mut PoolConfig),
    ) -> bool {
        let mut registry = self.registry.lock();
        let old_identity = config.read().identity().to_string();
        let mut candidate = config.read().clone();
        mutate(&mut candidate);
        let new_identity = candidate.identity().to_string();

        if new_identity == old_identity {
            *config.write() = candidate;
            return true;
        }
        if new_identity.trim().is_empty() {
            sink_error!(
                self.sink,
                "Rejected registering request of instance {:?} with blank name",
                pool
            );
            return false;
        }
        if registry.contains_key(&new_identity) {
            sink_error!(
                self.sink,
                "Rejected registering request of instance {:?} with duplicate name: {}",
                pool,
                new_identity
            );
            return false;
        }

        let owned = registry
            .get(&old_identity)
            .is_some_and(|wrapper| Arc::ptr_eq(wrapper.shared_config(), config));
        if owned {
            self.remove_locked(&mut registry, &old_identity);
        }
        *config.write() = candidate;
        self.register_locked(&mut registry, &new_identity, pool, config, statistics)
    }

    /// Sets the monitor period of a pool and restarts its monitor if running.
    pub fn update_period(&self, config: &SharedConfig, period: u64) {
        let registry = self.registry.lock();
        let identity = {
            let mut config = config.write();
            config.update_period(period);
            config.identity().to_string()
        };
        if let Some(wrapper) = registry
            .get(&identity)
            .filter(|w| Arc::ptr_eq(w.shared_config(), config))
        {
            if wrapper.is_started() {
                self.reschedule_wrapper(&identity, wrapper);
            }
        }
    }

    /// Sets the task timeout of a pool and restarts its monitor if running.
    pub fn update_timeout(&self, config: &SharedConfig, timeout: u64) {
        let registry = self.registry.lock();
        let (identity, timeout, unit) = {
            let mut config = config.write();
            config.update_timeout(timeout);
            (
                config.identity().to_string(),
                config.task_timeout(),
                config.time_unit(),
            )
        };
        sink_info!(
            self.sink,
            "Updated '{}' taskTimeout to {} {}",
            identity,
            timeout,
            unit
        );
        if let Some(wrapper) = registry
            .get(&identity)
            .filter(|w| Arc::ptr_eq(w.shared_config(), config))
        {
            if wrapper.is_started() {
                self.reschedule_wrapper(&identity, wrapper);
            }
        }
    }

    pub fn lookup_pool(&self, identity: &str) -> Option<Arc<dyn GovernedPool>> {
        self.registry.lock().get(identity).and_then(|wrapper| wrapper.pool())
    }

    pub fn lookup_wrapper(&self, identity: &str) -> Option<Arc<MonitorWrapper>> {
        self.registry.lock().get(identity).cloned()
    }

    /// Registered identities in sorted order.
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.registry.lock().keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Turns the monitors' counters and averages lines on or off.
    pub fn set_governor_loggable(&self, loggable: bool) {
        self.loggable.store(loggable, Ordering::Release);
    }

    pub fn is_governor_loggable(&self) -> bool {
        self.loggable.load(Ordering::Acquire)
    }

    /// Sets the period of the registry self-dump; zero disables it.
    pub fn set_governor_period(&self, period: u64, unit: TimeUnit) {
        let mut dumper = self.dumper.lock();
        if let Some(previous) = dumper.take() {
            previous.cancel();
        }
        if period == 0 {
            return;
        }
        let registry = Arc::clone(&self.registry);
        let loggable = Arc::clone(&self.loggable);
        let sink = Arc::clone(&self.sink);
        *dumper = Some(self.scheduler.spawn_periodic(unit.to_duration(period), move || {
            if loggable.load(Ordering::Acquire) {
                dump_registry(&registry, sink.as_ref());
            }
        }));
    }

    /// Logs the registry summary and every pool's counters once.
    pub fn dump(&self) {
        dump_registry(&self.registry, self.sink.as_ref());
    }

    /// Cancels every monitor, clears the registry and stops the scheduler.
    ///
    /// Pools governed by this instance keep running; they are simply no longer monitored.
    pub fn shutdown(&self) {
        if let Some(dumper) = self.dumper.lock().take() {
            dumper.cancel();
        }
        let drained: Vec<_> = self.registry.lock().drain().collect();
        for (_, wrapper) in &drained {
            wrapper.cancel();
        }
        self.scheduler.shutdown();
        sink_info!(
            self.sink,
            "Thread pool governor shut down, {} pool(s) released",
            drained.len()
        );
    }
}

fn period_of(wrapper: &MonitorWrapper) -> (u64, TimeUnit) {
    let config = wrapper.shared_config().read();
    (config.monitor_period(), config.time_unit())
}

fn dump_registry(registry: &Registry, sink: &dyn LogSink) {
    let wrappers: Vec<(String, Arc<MonitorWrapper>)> = {
        let registry = registry.lock();
        let mut wrappers: Vec<_> = registry
            .iter()
            .map(|(identity, wrapper)| (identity.clone(), Arc::clone(wrapper)))
            .collect();
        wrappers.sort_by(|a, b| a.0.cmp(&b.0));
        wrappers
    };
    let started = wrappers.iter().filter(|(_, w)| w.is_started()).count();
    sink_info!(sink, "Thread pool governor info: [{},{}]", wrappers.len(), started);
    for (identity, wrapper) in &wrappers {
        let counters = wrapper.monitor().counters();
        sink_info!(
            sink,
            "Thread pool '{}' info: [{},{},{},{},{}]",
            identity,
            counters.queue_size,
            counters.executing,
            counters.idle,
            counters.pool_size,
            counters.decayed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;

    #[derive(Debug)]
    struct FixedPool;

    impl GovernedPool for FixedPool {
        fn pool_size(&self) -> usize {
            4
        }
        fn queue_size(&self) -> usize {
            2
        }
        fn active_count(&self) -> usize {
            0
        }
        fn is_shutdown(&self) -> bool {
            false
        }
        fn is_terminated(&self) -> bool {
            false
        }
    }

    fn governor() -> (Arc<Governor>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let config = GovernorConfig::default().with_sink(sink.clone());
        (Governor::new(config).unwrap(), sink)
    }

    fn registered(
        governor: &Governor,
        name: &str,
        group: &str,
    ) -> (Arc<dyn GovernedPool>, SharedConfig) {
        let pool: Arc<dyn GovernedPool> = Arc::new(FixedPool);
        let config = PoolConfig::build(name, group, 0, 60_000, None).into_shared();
        let statistics = Arc::new(Statistics::new());
        statistics.bind_pool(Arc::downgrade(&pool));
        let identity = config.read().identity().to_string();
        governor.register(&identity, &pool, &config, &statistics);
        (pool, config)
    }

    #[test]
    fn unknown_identity_is_logged_not_raised() {
        let (governor, sink) = governor();
        assert!(!governor.start_monitor("missing"));
        assert!(!governor.stop_monitor("missing"));
        assert_eq!(
            sink.count_containing("Thread pool with name 'missing' is not registered yet"),
            2
        );
    }

    #[test]
    fn unregister_ignores_foreign_config() {
        let (governor, _) = governor();
        let (_pool, config) = registered(&governor, "io", "");
        let impostor = PoolConfig::build("io", "", 0, 0, None).into_shared();

        assert!(!governor.unregister(&impostor));
        assert!(governor.lookup_wrapper("io").is_some());
        assert!(governor.unregister(&config));
        assert!(!governor.unregister(&config));
    }

    #[test]
    fn self_dump_reports_registry() {
        let (governor, sink) = governor();
        let (_a, _) = registered(&governor, "a", "g");
        let (_b, _) = registered(&governor, "b", "g");
        governor.stop_monitor("g-b");

        governor.dump();
        assert!(sink.contains("Thread pool governor info: [2,1]"));
        assert!(sink.contains("Thread pool 'g-a' info: [2,0,4,4,0]"));
    }

    #[test]
    fn shutdown_releases_everything() {
        let (governor, sink) = governor();
        let (_pool, _) = registered(&governor, "io", "");
        governor.shutdown();
        assert!(governor.identities().is_empty());
        assert!(sink.contains("Thread pool governor shut down, 1 pool(s) released"));
    }
}
