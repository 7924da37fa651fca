//! Per-target configuration.
//!
//! One YAML file describes one monitored instance. Files are re-read on every
//! tick, so edits take effect without a restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::Tags;

use super::validation::{ConfigError, expand_env_vars};

/// Default MySQL port.
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Default retention of process-list snapshots (days).
pub const DEFAULT_SNAPSHOT_DAYS: u32 = 10;

/// Tag names set by the collector itself; custom tags may not override them.
const RESERVED_TAGS: &[&str] = &["target", "role", "port", "isSlave", "readOnly", "type"];

fn default_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

fn default_user() -> String {
    "root".to_string()
}

fn default_snapshot_days() -> u32 {
    DEFAULT_SNAPSHOT_DAYS
}

/// Configuration of one monitored database instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host (IP or hostname).
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login user (default: "root").
    #[serde(default = "default_user")]
    pub user: String,

    /// Login password; supports `${VAR}` expansion.
    #[serde(default)]
    pub password: String,

    /// Endpoint identity reported to the agent (default: host).
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Reporting step override (default: scheduler interval).
    #[serde(default, with = "humantime_serde")]
    pub step: Option<Duration>,

    /// Custom tags added to every record.
    #[serde(default)]
    pub tags: Tags,

    /// Metric names (`<category>.<field>`) never forwarded.
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Working directory for per-target logs.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Directory receiving process-list snapshots.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,

    /// Snapshot retention in days (default: 10).
    #[serde(default = "default_snapshot_days")]
    pub snapshot_days: u32,
}

impl TargetConfig {
    /// Create a target configuration with defaults.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            user: default_user(),
            password: String::new(),
            endpoint: None,
            step: None,
            tags: Tags::new(),
            ignore: Vec::new(),
            log_dir: None,
            snapshot_dir: None,
            snapshot_days: DEFAULT_SNAPSHOT_DAYS,
        }
    }

    /// Load a target configuration file, expanding environment variables.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::from(e).in_file(path))?;
        let config: Self = serde_yaml::from_str(&expand_env_vars(&content))
            .map_err(|e| ConfigError::from(e).in_file(path))?;
        config.validate().map_err(|e| e.in_file(path))?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "host cannot be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationError(
                "port must be non-zero".to_string(),
            ));
        }
        if self.user.is_empty() {
            return Err(ConfigError::ValidationError(
                "user cannot be empty".to_string(),
            ));
        }
        if let Some(endpoint) = &self.endpoint
            && endpoint.trim().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "endpoint cannot be blank".to_string(),
            ));
        }
        if let Some(step) = self.step
            && step < Duration::from_secs(1)
        {
            return Err(ConfigError::ValidationError(format!(
                "step must be at least 1s, got {:?}",
                step
            )));
        }
        if let Some(reserved) = self.tags.keys().find(|k| RESERVED_TAGS.contains(&k.as_str())) {
            return Err(ConfigError::ValidationError(format!(
                "tag '{}' is reserved",
                reserved
            )));
        }
        Ok(())
    }

    /// Endpoint identity reported to the agent.
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(&self.host)
    }

    /// Set login credentials.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set endpoint identity.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set reporting step override.
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = Some(step);
        self
    }

    /// Set custom tags.
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Set the snapshot directory.
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    /// Set ignored metric names.
    pub fn with_ignore(mut self, names: Vec<String>) -> Self {
        self.ignore = names;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_config_serde_full() {
        let yaml = r#"
host: 10.0.0.5
port: 3307
user: monitor
password: secret
endpoint: db-05
step: 30s
tags:
  cluster: orders
ignore:
  - global_status.Uptime
snapshot_dir: /tmp/snap
snapshot_days: 3
"#;

        let config: TargetConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 3307);
        assert_eq!(config.user, "monitor");
        assert_eq!(config.endpoint(), "db-05");
        assert_eq!(config.step, Some(Duration::from_secs(30)));
        assert_eq!(config.tags.get("cluster"), Some(&"orders".to_string()));
        assert_eq!(config.ignore, vec!["global_status.Uptime".to_string()]);
        assert_eq!(config.snapshot_days, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_target_config_serde_defaults() {
        let config: TargetConfig = serde_yaml::from_str("host: 127.0.0.1").unwrap();
        assert_eq!(config.port, DEFAULT_MYSQL_PORT);
        assert_eq!(config.user, "root");
        assert_eq!(config.endpoint(), "127.0.0.1");
        assert_eq!(config.step, None);
        assert_eq!(config.snapshot_days, DEFAULT_SNAPSHOT_DAYS);
    }

    #[test]
    fn test_target_config_validate_port() {
        let config = TargetConfig::new("127.0.0.1", 0);
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("port must be non-zero"));
    }

    #[test]
    fn test_target_config_validate_reserved_tag() {
        let mut tags = Tags::new();
        tags.insert("role".into(), "primary".into());
        let config = TargetConfig::new("127.0.0.1", 3306).with_tags(tags);
        assert!(config.validate().unwrap_err().to_string().contains("reserved"));
    }

    #[test]
    fn test_target_config_validate_short_step() {
        let config =
            TargetConfig::new("127.0.0.1", 3306).with_step(Duration::from_millis(200));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_target_config_load_expands_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.yaml");
        std::fs::write(
            &path,
            "host: 127.0.0.1\npassword: ${DBMON_TARGET_TEST_UNSET_VAR:-from-default}\n",
        )
        .unwrap();

        let config = TargetConfig::load(&path).unwrap();
        assert_eq!(config.password, "from-default");
    }

    #[test]
    fn test_target_config_load_malformed_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "host: [unterminated").unwrap();

        let err = TargetConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }
}
