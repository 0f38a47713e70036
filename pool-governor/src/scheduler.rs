use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use pool_governor_api::GovernorError;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

/// Shortest period a periodic job may run at.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Longest period a periodic job may run at; longer periods are clamped.
pub const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Background scheduler driving every periodic job of a governor.
///
/// Jobs are synchronous closures run on the scheduler's runtime, never on pool workers.
/// The governor normally owns a dedicated single-threaded runtime; embedders already running
/// tokio can hand in a [`Handle`] instead.
pub struct MonitorScheduler {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
}

impl fmt::Debug for MonitorScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorScheduler")
            .field("owns_runtime", &self.runtime.lock().is_some())
            .finish()
    }
}

impl MonitorScheduler {
    /// Starts a dedicated runtime with one worker thread called `thread_name`.
    pub fn new(thread_name: &str) -> Result<Self, GovernorError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(thread_name)
            .enable_time()
            .build()
            .map_err(GovernorError::Runtime)?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
        })
    }

    /// Runs jobs on an existing runtime. The runtime must have its time driver enabled.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            runtime: Mutex::new(None),
            handle,
        }
    }

    /// Calls `job` every `period`, first one period from now.
    ///
    /// A slow job delays the following ticks instead of letting them pile up.
    pub fn spawn_periodic<F>(&self, period: Duration, job: F) -> PeriodicHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let period = period.clamp(MIN_PERIOD, MAX_PERIOD);
        let join = self.handle.spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                job();
            }
        });
        PeriodicHandle { join }
    }

    /// Stops the owned runtime without waiting for running jobs. Safe to call from async code.
    pub fn shutdown(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            debug!("Shutting down monitor scheduler");
            runtime.shutdown_background();
        }
    }
}

impl Drop for MonitorScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cancellation handle of a periodic job.
#[derive(Debug)]
pub struct PeriodicHandle {
    join: JoinHandle<()>,
}

impl PeriodicHandle {
    /// Stops scheduling further runs. A run already executing finishes first.
    pub fn cancel(self) {
        self.join.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn periodic_job_runs_until_cancelled() {
        let scheduler = MonitorScheduler::new("scheduler-test").unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let handle = scheduler.spawn_periodic(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(100));
        handle.cancel();
        thread::sleep(Duration::from_millis(20));
        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 3, "only {} runs", seen);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn first_run_waits_one_period() {
        let scheduler = MonitorScheduler::new("scheduler-delay").unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let _handle = scheduler.spawn_periodic(Duration::from_millis(200), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn external_handle_runs_jobs_and_drop_is_safe_in_async_context() {
        let scheduler = MonitorScheduler::with_handle(Handle::current());
        let (tx, rx) = flume::unbounded();
        let handle = scheduler.spawn_periodic(Duration::from_millis(5), move || {
            let _ = tx.send(());
        });
        rx.recv_async().await.unwrap();
        handle.cancel();

        let owned = MonitorScheduler::new("scheduler-async-drop").unwrap();
        drop(owned);
    }
}
