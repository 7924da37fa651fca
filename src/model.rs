//! Core data types shared by the pipeline, publisher and scheduler.
//!
//! - [`MetricRecord`]: One value forwarded to the push agent
//! - [`MetricKind`]: Counter or gauge semantics of a record
//! - [`Role`] / [`LivenessState`]: Up/down and replication role of a target
//! - [`CollectionResult`]: Outcome of one pipeline run for one target

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::collector::CollectorError;
use crate::target::TargetKey;

/// Tag set attached to every record (sorted for stable agent payloads).
pub type Tags = BTreeMap<String, String>;

/// Counter/gauge classification understood by the push agent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum MetricKind {
    /// Monotonically increasing value; the agent derives a rate.
    Counter,
    /// Point-in-time value.
    Gauge,
}

/// A single metric record forwarded to the push agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Endpoint identity of the monitored instance.
    pub endpoint: String,
    /// Metric name in `<category>.<field>` form.
    pub name: String,
    /// Numeric value.
    pub value: f64,
    /// Tag set; always contains `target` and `role`.
    pub tags: Tags,
    /// Collection timestamp of the tick (UTC).
    pub timestamp: DateTime<Utc>,
    /// Reporting step in seconds.
    pub step_secs: u64,
    /// Counter or gauge.
    pub kind: MetricKind,
}

/// Replication role of a target as seen during one tick.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum Role {
    /// Writable primary without replication source.
    Master,
    /// Replica with at least one replication channel.
    Slave,
    /// Not a replica, but `read_only` is set.
    ReadOnly,
    /// Role could not be determined this tick.
    #[default]
    Unknown,
}

impl Role {
    /// Derive the role from the read-only flag and the slave-status row count.
    pub fn resolve(read_only: bool, replication_channels: usize) -> Self {
        match (replication_channels, read_only) {
            (0, false) => Self::Master,
            (0, true) => Self::ReadOnly,
            _ => Self::Slave,
        }
    }
}

/// Liveness of a target for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LivenessState {
    /// True iff every required step completed.
    pub alive: bool,
    /// Role resolved from steps 1–2.
    pub role: Role,
    /// Global read-only flag, if it was read.
    pub read_only: Option<bool>,
}

impl LivenessState {
    /// Liveness for a target whose required steps all completed.
    pub fn up(role: Role, read_only: bool) -> Self {
        Self {
            alive: true,
            role,
            read_only: Some(read_only),
        }
    }

    /// Liveness for a target that failed before its role was resolved.
    pub fn down() -> Self {
        Self::default()
    }

    /// Liveness for a target that failed after steps 1-2 resolved its role.
    pub fn down_as(role: Role, read_only: bool) -> Self {
        Self {
            alive: false,
            role,
            read_only: Some(read_only),
        }
    }

    /// Whether the target replicates from another instance.
    pub fn is_slave(&self) -> bool {
        self.role == Role::Slave
    }
}

/// What happened to the metric push of one tick.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PublishOutcome {
    /// The agent accepted the batch; holds the raw response body.
    Published { response: String },
    /// The push failed; metrics of this tick are lost.
    Failed { error: String },
    /// No push was attempted (required steps failed).
    #[default]
    Skipped,
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published { .. })
    }
}

/// Outcome of one pipeline run for one target.
#[derive(Debug)]
pub struct CollectionResult {
    /// Single-flight key of the target.
    pub key: TargetKey,
    /// True iff steps 1–8 completed.
    pub success: bool,
    /// Wall time of the whole invocation.
    pub elapsed: Duration,
    /// Assembled metrics; empty unless `success`.
    pub metrics: Vec<MetricRecord>,
    /// Error that aborted the required steps.
    pub error: Option<CollectorError>,
    /// Liveness derived from the required steps.
    pub liveness: LivenessState,
    /// Metric push outcome.
    pub publish: PublishOutcome,
    /// Failure of the trailing diagnostic step, if any.
    pub diagnostic_error: Option<String>,
}

impl CollectionResult {
    /// Result for a run whose required steps failed.
    pub fn failed(
        key: TargetKey,
        elapsed: Duration,
        error: CollectorError,
        liveness: LivenessState,
    ) -> Self {
        Self {
            key,
            success: false,
            elapsed,
            metrics: Vec::new(),
            error: Some(error),
            liveness,
            publish: PublishOutcome::Skipped,
            diagnostic_error: None,
        }
    }

    /// Whether the run failed because its deadline elapsed.
    pub fn timed_out(&self) -> bool {
        matches!(self.error, Some(CollectorError::Timeout(_)))
    }
}
