//! Target enumeration.
//!
//! Resolves the set of targets to poll on a tick. Targets are loaded fresh from
//! disk every time; nothing about a target survives between ticks.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, TargetConfig};

/// Single-flight key of a target (`host:port`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetKey(String);

impl TargetKey {
    pub fn new(host: &str, port: u16) -> Self {
        Self(format!("{}:{}", host, port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One monitored instance, valid for a single tick.
#[derive(Debug, Clone)]
pub struct Target {
    key: TargetKey,
    source: PathBuf,
    config: TargetConfig,
}

impl Target {
    /// Build a target from an already validated configuration.
    pub fn new(config: TargetConfig, source: impl Into<PathBuf>) -> Self {
        Self {
            key: TargetKey::new(&config.host, config.port),
            source: source.into(),
            config,
        }
    }

    /// Load and validate a target from its configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        TargetConfig::load(path).map(|config| Self::new(config, path))
    }

    pub fn key(&self) -> &TargetKey {
        &self.key
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &str {
        self.config.endpoint()
    }

    /// Create the configured working directories.
    ///
    /// # Errors
    /// Returns `ConfigError` naming the directory that could not be created.
    pub fn prepare_dirs(&self) -> Result<(), ConfigError> {
        let dirs = [&self.config.log_dir, &self.config.snapshot_dir];
        for dir in dirs.into_iter().flatten() {
            std::fs::create_dir_all(dir).map_err(|e| {
                ConfigError::ValidationError(format!(
                    "cannot create directory '{}': {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

/// Where target configurations are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSource {
    /// Exactly one configuration file.
    File(PathBuf),
    /// Every `.yaml`/`.yml` file directly inside a directory.
    Dir(PathBuf),
}

/// Targets resolved for one tick plus the configs that were skipped.
#[derive(Debug, Default)]
pub struct Enumeration {
    pub targets: Vec<Target>,
    pub skipped: Vec<(PathBuf, ConfigError)>,
}

impl TargetSource {
    /// Verify the source still exists and has the expected kind.
    ///
    /// # Errors
    /// Returns `ConfigError::SourceMissing` when the path is gone, which is
    /// unrecoverable for the process.
    pub fn check(&self) -> Result<(), ConfigError> {
        match self {
            Self::File(path) if path.is_file() => Ok(()),
            Self::Dir(path) if path.is_dir() => Ok(()),
            Self::File(path) | Self::Dir(path) if !path.exists() => {
                Err(ConfigError::SourceMissing(path.clone()))
            }
            Self::File(path) => Err(ConfigError::ValidationError(format!(
                "'{}' is not a file",
                path.display()
            ))),
            Self::Dir(path) => Err(ConfigError::ValidationError(format!(
                "'{}' is not a directory",
                path.display()
            ))),
        }
    }

    /// Resolve the targets for one tick.
    ///
    /// Malformed configurations are skipped and reported in
    /// [`Enumeration::skipped`]; only a missing source is an error.
    pub fn enumerate(&self) -> Result<Enumeration, ConfigError> {
        self.check()?;

        let paths = match self {
            Self::File(path) => vec![path.clone()],
            Self::Dir(dir) => config_files(dir)?,
        };

        let mut enumeration = Enumeration::default();
        let mut seen = HashSet::new();
        for path in paths {
            match Target::load(&path) {
                Ok(target) => {
                    if !seen.insert(target.key().clone()) {
                        tracing::warn!(
                            target = %target.key(),
                            path = %path.display(),
                            "Duplicate target key; only one run per tick will be admitted"
                        );
                    }
                    enumeration.targets.push(target);
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Skipping target config");
                    enumeration.skipped.push((path, e));
                }
            }
        }

        tracing::debug!(
            targets = enumeration.targets.len(),
            skipped = enumeration.skipped.len(),
            "Targets enumerated"
        );
        Ok(enumeration)
    }
}

/// List config files directly inside `dir`, sorted by path.
fn config_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if !path.is_file() {
            continue;
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext != "yaml" && ext != "yml" {
            continue;
        }

        files.push(path);
    }
    files.sort();
    Ok(files)
}
