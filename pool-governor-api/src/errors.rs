//! # Governance Error Types
//!
//! Errors shared by pool implementations and the governor.
//!
//! ## Design Philosophy
//!
//! - Construction-time problems (`ConfigError`) fail fast and are returned to the caller
//! - Steady-state governance operations never fail with an error; they log instead
//! - Task outcomes (`TaskError`) and refusals (`RejectedError`) are values the submitter sees

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Invalid configuration supplied while building a pool or a governor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid time unit: {0}")]
    InvalidTimeUnit(String),
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),
    #[error("Invalid pool size (core: {core}, max: {max})")]
    InvalidPoolSize { core: usize, max: usize },
    #[error("Queue capacity must be greater than zero")]
    ZeroQueueCapacity,
}

/// Why a pool refused a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The queue is full and no further worker may be started.
    Saturated,
    /// The pool no longer accepts tasks.
    Shutdown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Saturated => f.write_str("queue is full and no worker is available"),
            RejectReason::Shutdown => f.write_str("pool is shut down"),
        }
    }
}

/// A task refused by a pool's rejection policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Task {task} rejected from {pool}: {reason}")]
pub struct RejectedError {
    /// Display name of the rejected task
    pub task: String,
    /// Description of the refusing pool
    pub pool: String,
    /// Cause of the refusal
    pub reason: RejectReason,
}

/// Outcome of a submitted task that did not produce a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task panicked: {0}")]
    Panicked(String),
    #[error("Task result channel closed before a result was sent")]
    Disconnected,
    #[error("Timed out after {0:?} waiting for task result")]
    Timeout(Duration),
}

/// Errors raised while creating or running a governor or a governed pool.
#[derive(Error, Debug)]
pub enum GovernorError {
    #[error("Failed to start monitor scheduler: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
