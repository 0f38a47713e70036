#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pool_governor::{Governor, GovernorConfig, MemorySink};

/// Creates an isolated governor whose lines are captured in the returned sink.
pub fn setup_governor() -> (Arc<Governor>, Arc<MemorySink>) {
    setup_governor_with(GovernorConfig::default())
}

pub fn setup_governor_with(config: GovernorConfig) -> (Arc<Governor>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::echoing());
    let governor = Governor::new(config.with_sink(sink.clone())).expect("governor should start");
    (governor, sink)
}

/// Polls `condition` every 10 ms until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Long enough that no monitor tick fires during a test
pub const QUIET_PERIOD_MS: u64 = 600_000;

/// Default wait time for asynchronous effects during tests
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);
