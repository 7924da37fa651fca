//! Application configuration structures.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scheduler::{BackpressurePolicy, PoolConfig};
use crate::target::TargetSource;

use super::validation::ConfigError;

// =============================================================================
// Constants
// =============================================================================

/// Default tick interval (60 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Default per-target deadline (30 seconds).
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Default push agent URL (local falcon agent).
pub const DEFAULT_AGENT_URL: &str = "http://127.0.0.1:1988/v1/push";

/// Default push request timeout (5 seconds).
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on blocking submissions (1 second).
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Default configuration directory.
pub const DEFAULT_CONFIG_DIR: &str = "etc";

/// Default diagnostic endpoint address.
pub const DEFAULT_DIAG_BIND: &str = "127.0.0.1:6060";

fn default_config_dir() -> Option<PathBuf> {
    Some(PathBuf::from(DEFAULT_CONFIG_DIR))
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_deadline() -> Duration {
    DEFAULT_DEADLINE
}

fn default_block_timeout() -> Duration {
    DEFAULT_BLOCK_TIMEOUT
}

/// Number of workers: one per available CPU.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

// =============================================================================
// Agent Configuration
// =============================================================================

/// Push agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Push URL (default: "http://127.0.0.1:1988/v1/push").
    pub url: String,

    /// Request timeout (default: 5s).
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_AGENT_URL.to_string(),
            timeout: DEFAULT_AGENT_TIMEOUT,
        }
    }
}

// =============================================================================
// Diagnostic Endpoint Configuration
// =============================================================================

/// Local diagnostic HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagConfig {
    /// Serve the endpoint (default: false).
    pub enabled: bool,

    /// Listen address (default: "127.0.0.1:6060").
    pub bind: String,
}

impl Default for DiagConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: DEFAULT_DIAG_BIND.to_string(),
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Single target file; takes precedence over `config_dir`.
    #[serde(default)]
    pub config_file: Option<PathBuf>,

    /// Directory of target files (default: "etc").
    #[serde(default = "default_config_dir")]
    pub config_dir: Option<PathBuf>,

    /// Tick interval (default: 60s).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Per-target pipeline deadline (default: 30s).
    #[serde(default = "default_deadline", with = "humantime_serde")]
    pub deadline: Duration,

    /// Worker pool capacity (default: CPU count).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Wait queue depth (default: same as `workers`).
    #[serde(default)]
    pub queue_depth: Option<usize>,

    /// Behaviour when the wait queue is full (default: drop).
    #[serde(default)]
    pub backpressure: BackpressurePolicy,

    /// Bound on a blocking submission (default: 1s).
    #[serde(default = "default_block_timeout", with = "humantime_serde")]
    pub block_timeout: Duration,

    /// Push agent settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Diagnostic endpoint settings.
    #[serde(default)]
    pub diag: DiagConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_file: None,
            config_dir: default_config_dir(),
            interval: DEFAULT_INTERVAL,
            deadline: DEFAULT_DEADLINE,
            workers: default_workers(),
            queue_depth: None,
            backpressure: BackpressurePolicy::default(),
            block_timeout: DEFAULT_BLOCK_TIMEOUT,
            agent: AgentConfig::default(),
            diag: DiagConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval < Duration::from_secs(1) {
            return Err(ConfigError::ValidationError(format!(
                "interval must be at least 1s, got {:?}",
                self.interval
            )));
        }

        if self.deadline.is_zero() {
            return Err(ConfigError::ValidationError(
                "deadline must be positive".to_string(),
            ));
        }

        if self.workers == 0 {
            return Err(ConfigError::ValidationError(
                "workers must be positive".to_string(),
            ));
        }

        if self.config_file.is_none() && self.config_dir.is_none() {
            return Err(ConfigError::ValidationError(
                "either config_file or config_dir must be set".to_string(),
            ));
        }

        let url = url::Url::parse(&self.agent.url).map_err(|e| {
            ConfigError::ValidationError(format!("invalid agent URL '{}': {}", self.agent.url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "agent URL must be http(s): '{}'",
                self.agent.url
            )));
        }

        if self.diag.enabled {
            self.diag.bind.parse::<SocketAddr>().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "invalid diagnostic bind address: '{}'",
                    self.diag.bind
                ))
            })?;
        }

        if self.deadline >= self.interval {
            tracing::warn!(
                deadline = ?self.deadline,
                interval = ?self.interval,
                "Deadline is not shorter than the tick interval; slow targets will skip ticks"
            );
        }

        Ok(())
    }

    /// Resolve where target configurations come from.
    ///
    /// # Errors
    /// Returns `ConfigError::SourceMissing` if the configured file or directory
    /// does not exist.
    pub fn target_source(&self) -> Result<TargetSource, ConfigError> {
        let source = match (&self.config_file, &self.config_dir) {
            (Some(file), _) => TargetSource::File(file.clone()),
            (None, Some(dir)) => TargetSource::Dir(dir.clone()),
            (None, None) => {
                return Err(ConfigError::ValidationError(
                    "either config_file or config_dir must be set".to_string(),
                ));
            }
        };
        source.check()?;
        Ok(source)
    }

    /// Worker pool settings derived from this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            capacity: self.workers,
            queue_depth: self.queue_depth.unwrap_or(self.workers),
            backpressure: self.backpressure,
            block_timeout: self.block_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.interval, DEFAULT_INTERVAL);
        assert_eq!(config.deadline, DEFAULT_DEADLINE);
        assert_eq!(config.config_dir, Some(PathBuf::from("etc")));
        assert!(config.workers > 0);
        assert_eq!(config.agent.url, DEFAULT_AGENT_URL);
        assert!(!config.diag.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_serde() {
        let yaml = r#"
config_dir: /etc/dbmon
interval: 10s
deadline: 5s
workers: 8
queue_depth: 2
backpressure: block
block_timeout: 250ms
agent:
  url: http://10.1.1.1:1988/v1/push
diag:
  enabled: true
  bind: 0.0.0.0:6061
"#;

        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.deadline, Duration::from_secs(5));
        assert_eq!(config.workers, 8);
        assert_eq!(config.backpressure, BackpressurePolicy::Block);
        assert_eq!(config.agent.timeout, DEFAULT_AGENT_TIMEOUT);
        assert!(config.validate().is_ok());

        let pool = config.pool_config();
        assert_eq!(pool.capacity, 8);
        assert_eq!(pool.queue_depth, 2);
        assert_eq!(pool.block_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_app_config_validation_invalid_agent_url() {
        let mut config = AppConfig::default();
        config.agent.url = "not a url".to_string();
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("invalid agent URL"));
    }

    #[test]
    fn test_app_config_validation_zero_workers() {
        let config = AppConfig {
            workers: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_app_config_validation_invalid_diag_bind() {
        let mut config = AppConfig::default();
        config.diag.enabled = true;
        config.diag.bind = "localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_target_source_missing_dir() {
        let config = AppConfig {
            config_dir: Some(PathBuf::from("/nonexistent/dbmon/etc")),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.target_source(),
            Err(ConfigError::SourceMissing(_))
        ));
    }

    #[test]
    fn test_target_source_file_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("db.yaml");
        std::fs::write(&file, "host: 127.0.0.1\n").unwrap();

        let config = AppConfig {
            config_file: Some(file.clone()),
            config_dir: Some(dir.path().to_path_buf()),
            ..AppConfig::default()
        };
        assert_eq!(config.target_source().unwrap(), TargetSource::File(file));
    }
}
