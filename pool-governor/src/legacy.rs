//! Free-function aliases over the process-wide [`Governor`].
//!
//! These keep older call sites compiling. Each one forwards to [`Governor::global`] and has no
//! behavior of its own; new code should hold a `Governor` and call it directly.

#![allow(deprecated)]

use std::sync::Arc;

use pool_governor_api::{GovernedPool, GovernorError, TimeUnit};

use crate::governor::Governor;

#[deprecated(note = "use `Governor::set_governor_loggable`")]
pub fn set_loggable(loggable: bool) -> Result<(), GovernorError> {
    Governor::global()?.set_governor_loggable(loggable);
    Ok(())
}

#[deprecated(note = "use `Governor::is_governor_loggable`")]
pub fn is_loggable() -> Result<bool, GovernorError> {
    Ok(Governor::global()?.is_governor_loggable())
}

#[deprecated(note = "use `Governor::set_governor_period`")]
pub fn set_period(period: u64, unit: TimeUnit) -> Result<(), GovernorError> {
    Governor::global()?.set_governor_period(period, unit);
    Ok(())
}

#[deprecated(note = "use `Governor::start_monitor`")]
pub fn start(identity: &str) -> Result<bool, GovernorError> {
    Ok(Governor::global()?.start_monitor(identity))
}

#[deprecated(note = "use `Governor::stop_monitor`")]
pub fn stop(identity: &str) -> Result<bool, GovernorError> {
    Ok(Governor::global()?.stop_monitor(identity))
}

#[deprecated(note = "use `Governor::reschedule`")]
pub fn restart(identity: &str) -> Result<bool, GovernorError> {
    Ok(Governor::global()?.reschedule(identity))
}

#[deprecated(note = "use `Governor::start_space`")]
pub fn start_namespace(namespace: &str) -> Result<usize, GovernorError> {
    Ok(Governor::global()?.start_space(namespace))
}

#[deprecated(note = "use `Governor::stop_space`")]
pub fn stop_namespace(namespace: &str) -> Result<usize, GovernorError> {
    Ok(Governor::global()?.stop_space(namespace))
}

#[deprecated(note = "use `Governor::reschedule_space`")]
pub fn reschedule_namespace(namespace: &str, period: u64) -> Result<usize, GovernorError> {
    Ok(Governor::global()?.reschedule_space(namespace, period))
}

#[deprecated(note = "use `Governor::lookup_pool`")]
pub fn get_pool(identity: &str) -> Result<Option<Arc<dyn GovernedPool>>, GovernorError> {
    Ok(Governor::global()?.lookup_pool(identity))
}
