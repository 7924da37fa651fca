//! Metric assembly.
//!
//! Turns raw step samples into [`MetricRecord`]s named `<category>.<field>`,
//! all sharing the endpoint, tags and timestamp of one tick.

use chrono::{DateTime, Utc};
use strum_macros::{AsRefStr, Display};

use crate::collector::RawValue;
use crate::model::{MetricKind, MetricRecord, Role, Tags};
use crate::target::Target;

/// Record name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Category {
    GlobalStatus,
    GlobalVariables,
    Innodb,
    SlaveStatus,
    Binlog,
    Liveness,
}

/// One raw value produced by a step, before coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub category: Category,
    pub field: String,
    pub value: RawValue,
    pub kind: MetricKind,
}

impl Sample {
    pub fn gauge(category: Category, field: impl Into<String>, value: impl Into<RawValue>) -> Self {
        Self {
            category,
            field: field.into(),
            value: value.into(),
            kind: MetricKind::Gauge,
        }
    }

    pub fn counter(
        category: Category,
        field: impl Into<String>,
        value: impl Into<RawValue>,
    ) -> Self {
        Self {
            category,
            field: field.into(),
            value: value.into(),
            kind: MetricKind::Counter,
        }
    }

    /// Full record name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.category, self.field)
    }
}

/// Coerce a raw value to the single numeric representation used on the wire.
///
/// Returns `None` for NULL, non-finite and non-numeric values.
pub fn coerce(value: &RawValue) -> Option<f64> {
    let number = match value {
        RawValue::Null => return None,
        RawValue::Int(v) => *v as f64,
        RawValue::UInt(v) => *v as f64,
        RawValue::Float(v) => *v,
        RawValue::Text(text) => {
            let text = text.trim();
            match text.to_ascii_uppercase().as_str() {
                "" => return None,
                "ON" | "YES" | "TRUE" => 1.0,
                "OFF" | "NO" | "FALSE" => 0.0,
                _ => text.parse::<f64>().ok()?,
            }
        }
    };
    number.is_finite().then_some(number)
}

/// Per-tick record factory for one target.
#[derive(Debug, Clone)]
pub struct MetricAssembler {
    endpoint: String,
    tags: Tags,
    ignore: Vec<String>,
    step_secs: u64,
    timestamp: DateTime<Utc>,
}

impl MetricAssembler {
    /// Build the assembler for a tick, resolving the tag set from the role.
    pub fn new(
        target: &Target,
        role: Role,
        read_only: Option<bool>,
        step_secs: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let config = target.config();
        let mut tags = config.tags.clone();
        tags.insert("target".into(), target.key().to_string());
        tags.insert("port".into(), config.port.to_string());
        tags.insert("role".into(), role.to_string());
        tags.insert("type".into(), "mysql".into());
        tags.insert(
            "isSlave".into(),
            u8::from(role == Role::Slave).to_string(),
        );
        if let Some(read_only) = read_only {
            tags.insert("readOnly".into(), u8::from(read_only).to_string());
        }

        Self {
            endpoint: target.endpoint().to_string(),
            tags,
            ignore: config.ignore.clone(),
            step_secs: config.step.map(|s| s.as_secs()).unwrap_or(step_secs),
            timestamp,
        }
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Convert samples to records, dropping ignored and non-numeric values.
    pub fn assemble(&self, samples: Vec<Sample>) -> Vec<MetricRecord> {
        let mut records = Vec::with_capacity(samples.len());
        let mut dropped = Vec::new();

        for sample in samples {
            let name = sample.name();
            if self.ignore.iter().any(|ignored| *ignored == name) {
                continue;
            }
            match coerce(&sample.value) {
                Some(value) => records.push(MetricRecord {
                    endpoint: self.endpoint.clone(),
                    name,
                    value,
                    tags: self.tags.clone(),
                    timestamp: self.timestamp,
                    step_secs: self.step_secs,
                    kind: sample.kind,
                }),
                None => dropped.push(name),
            }
        }

        if !dropped.is_empty() {
            tracing::warn!(
                endpoint = %self.endpoint,
                dropped = dropped.len(),
                first = %dropped[0],
                "Dropped non-numeric values"
            );
            tracing::debug!(endpoint = %self.endpoint, names = ?dropped, "Dropped values");
        }

        records
    }
}
