//! Runs a single slow task on a governed pool and lets the monitor report it.
//!
//! The pool has one worker, a 1000 ms monitor period and a 2200 ms task timeout. The task
//! sleeps 4200 ms, so the monitor flags it as decayed on two ticks and dumps its stack once.
//!
//! ```text
//! RUST_BACKTRACE=1 cargo run --bin pool-governor-demo
//! ```

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use pool_governor::logging::{self, LogConfig};
use pool_governor::{Governor, GovernorConfig, TaskOptions, ThreadPoolBuilder, TimeUnit};
use tracing::info;

fn main() -> Result<()> {
    let level = std::env::var("DEMO_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    logging::init(LogConfig::default().with_level_name(&level)?);

    let governor = Governor::new(GovernorConfig::from_env()).context("starting governor")?;
    let pool = ThreadPoolBuilder::new("demo")
        .group("slow")
        .core_size(1)
        .max_size(1)
        .task_timeout(2200)
        .monitor_period(1000)
        .time_unit(TimeUnit::Milliseconds)
        .rejection_diagnostics(Duration::from_secs(5))
        .governor(governor.clone())
        .build()
        .context("building pool")?;

    info!(identity = %pool.identity(), "Submitting slow task");
    let handle = pool.submit_with(
        TaskOptions::new().label("slow-report").trace_id("demo-trace-1"),
        || {
            thread::sleep(Duration::from_millis(4200));
            "report ready"
        },
    )?;

    let result = handle.join()?;
    info!(result, "Slow task finished");

    thread::sleep(Duration::from_millis(1200));
    if let Some(monitor) = pool.monitor() {
        info!(
            decayed = monitor.decayed_observations(),
            dumps = monitor.trace_dumps(),
            "Monitor summary"
        );
    }

    pool.shutdown();
    pool.await_termination(Duration::from_secs(5));
    governor.dump();
    governor.shutdown();
    Ok(())
}
