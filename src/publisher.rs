//! Metric publishing to the push agent.
//!
//! The agent accepts a JSON array of Open-Falcon style items over HTTP POST.
//! A publish failure is reported to the caller, which only logs it: liveness is
//! never derived from the publish outcome.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AgentConfig;
use crate::model::{MetricKind, MetricRecord, Tags};

/// Errors returned by a [`Publisher`].
#[derive(Debug, Error)]
pub enum PublishError {
    /// The HTTP client could not be built.
    #[error("invalid publisher configuration: {0}")]
    Config(String),

    /// The agent could not be reached.
    #[error("agent unreachable: {0}")]
    Transport(String),

    /// The agent answered with a non-success status.
    #[error("agent returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The batch could not be serialized.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Sink for assembled metric batches.
#[async_trait::async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// Push a batch and return the agent's response text.
    async fn push(&self, metrics: &[MetricRecord]) -> Result<String, PublishError>;
}

/// One item of the agent payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentItem {
    pub endpoint: String,
    pub metric: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub step: u64,
    pub value: f64,
    pub counter_type: MetricKind,
    /// Sorted `k=v,k=v` string.
    pub tags: String,
}

/// Render a tag set as the agent's `k=v,k=v` string.
pub fn format_tags(tags: &Tags) -> String {
    tags.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Convert records into the agent payload.
pub fn to_agent_payload(metrics: &[MetricRecord]) -> Vec<AgentItem> {
    metrics
        .iter()
        .map(|record| AgentItem {
            endpoint: record.endpoint.clone(),
            metric: record.name.clone(),
            timestamp: record.timestamp.timestamp(),
            step: record.step_secs,
            value: record.value,
            counter_type: record.kind,
            tags: format_tags(&record.tags),
        })
        .collect()
}

/// Publisher posting to an HTTP push agent.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: Client,
    url: String,
}

impl HttpPublisher {
    /// Create a publisher for the agent at `url`.
    ///
    /// # Errors
    /// Returns `PublishError::Config` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self, PublishError> {
        Self::new(config.url.clone(), config.timeout)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl Publisher for HttpPublisher {
    async fn push(&self, metrics: &[MetricRecord]) -> Result<String, PublishError> {
        if metrics.is_empty() {
            return Ok(String::new());
        }

        let body = serde_json::to_vec(&to_agent_payload(metrics))?;
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(PublishError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        tracing::debug!(url = %self.url, count = metrics.len(), response = %text, "Metrics pushed");
        Ok(text)
    }
}
