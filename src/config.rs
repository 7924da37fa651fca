//! Configuration module for dbmon.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Process settings (tick interval, deadline, worker pool, push agent)
//! - Per-target settings (one file per monitored instance)

mod app;
mod target;
mod validation;

pub use app::{AgentConfig, AppConfig, DiagConfig, default_workers};
pub use target::TargetConfig;
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{DEFAULT_AGENT_URL, DEFAULT_BLOCK_TIMEOUT, DEFAULT_DEADLINE, DEFAULT_INTERVAL};
pub use target::{DEFAULT_MYSQL_PORT, DEFAULT_SNAPSHOT_DAYS};
