//! Core collector traits and types.

use std::time::Duration;

use strum_macros::{AsRefStr, Display};
use thiserror::Error;

use crate::config::ConfigError;
use crate::target::Target;

/// Errors that abort the required part of a pipeline run.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Target configuration or working directories unusable.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Could not open or authenticate the connection.
    #[error("connection to {target} failed: {message}")]
    Connection { target: String, message: String },

    /// A required step failed.
    #[error("step '{step}' failed: {source}")]
    Step {
        step: Step,
        #[source]
        source: QueryError,
    },

    /// Deadline elapsed before the required steps completed.
    #[error("deadline of {0:?} elapsed")]
    Timeout(Duration),
}

impl CollectorError {
    /// Wrap a query failure with the step it belongs to.
    pub fn step(step: Step) -> impl FnOnce(QueryError) -> Self {
        move |source| Self::Step { step, source }
    }
}

/// A statement failed on an open session.
#[derive(Debug, Clone, Error)]
#[error("query '{statement}' failed: {message}")]
pub struct QueryError {
    pub statement: String,
    pub message: String,
}

impl QueryError {
    pub fn new(statement: impl Into<String>, message: impl ToString) -> Self {
        Self {
            statement: statement.into(),
            message: message.to_string(),
        }
    }
}

/// Pipeline steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    ReadOnly,
    SlaveStatus,
    ResolveTag,
    GlobalStatus,
    GlobalVariables,
    EngineStatus,
    MergeSlaveMetrics,
    BinaryLogs,
    Publish,
    Processlist,
}

/// A single column value as returned by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl RawValue {
    /// Text view of the value, if it is textual.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value for logs and snapshots.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Int(v) => v.to_string(),
            Self::UInt(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for RawValue {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

/// One result row with named columns in server order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, RawValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column (builder style).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<RawValue>) {
        self.columns.push((name.into(), value.into()));
    }

    /// Look up a column by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.columns
            .iter()
            .find(|(col, _)| col.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Value at a column position.
    pub fn value(&self, index: usize) -> Option<&RawValue> {
        self.columns.get(index).map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// An exclusively-owned database connection for one pipeline run.
///
/// Dropping a session must close the underlying socket; this is how a run
/// that overran its deadline aborts an in-flight statement.
#[async_trait::async_trait]
pub trait Session: Send {
    /// Execute a statement and return all rows.
    async fn query(&mut self, statement: &str) -> Result<Vec<Row>, QueryError>;

    /// Close the connection gracefully.
    async fn close(self: Box<Self>);
}

/// Opens sessions to targets.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open and authenticate a new connection to `target`.
    async fn connect(&self, target: &Target) -> Result<Box<dyn Session>, CollectorError>;
}
