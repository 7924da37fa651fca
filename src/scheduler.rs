//! Scheduling Layer
//!
//! - [`Scheduler`]: Wall-clock aligned tick that enumerates and submits targets
//! - [`WorkerPool`]: Bounded concurrency with per-target single-flight
//! - [`Schedule`]: Interval or cron trigger

mod pool;
mod registry;
mod schedule;

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

pub use pool::{BackpressurePolicy, PoolConfig, PoolStats, SubmitError, WorkerPool};
pub use registry::{DEFAULT_SHUTDOWN_TIMEOUT, Scheduler, TickSummary};
pub use schedule::{MIN_INTERVAL, Schedule};

/// Errors raised by the scheduler itself (never by a target).
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The underlying job scheduler failed.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Schedule expression rejected.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The configured target source no longer exists.
    #[error("target source missing: {}", .0.display())]
    SourceMissing(PathBuf),

    /// The target source could not be read.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
