//! In-memory test doubles for driving the engine without a database or agent.
//!
//! - [`ScriptedConnector`] / [`ScriptedSession`]: canned rows, failures and
//!   delays per statement, with session open/close accounting
//! - [`RecordingPublisher`]: keeps every pushed batch, can be switched to fail

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::collector::engine::SHOW_INNODB_STATUS;
use crate::collector::steps;
use crate::collector::{CollectorError, Connector, QueryError, RawValue, Row, Session};
use crate::model::MetricRecord;
use crate::publisher::{PublishError, Publisher};
use crate::target::Target;

#[derive(Debug, Clone)]
enum Response {
    Rows(Vec<Row>),
    Fail(String),
}

/// Per-statement responses.
#[derive(Debug, Clone, Default)]
pub struct Script {
    responses: HashMap<String, Response>,
    delays: HashMap<String, Duration>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, statement: &str, rows: Vec<Row>) -> Self {
        self.responses
            .insert(statement.to_string(), Response::Rows(rows));
        self
    }

    pub fn with_failure(mut self, statement: &str, message: impl Into<String>) -> Self {
        self.responses
            .insert(statement.to_string(), Response::Fail(message.into()));
        self
    }

    /// Sleep before answering `statement`.
    pub fn with_delay(mut self, statement: &str, delay: Duration) -> Self {
        self.delays.insert(statement.to_string(), delay);
        self
    }
}

fn status_row(name: &str, value: &str) -> Row {
    Row::new().with("Variable_name", name).with("Value", value)
}

/// Script of a writable master with binary logging on.
pub fn healthy_script() -> Script {
    Script::new()
        .with_rows(
            steps::SELECT_READ_ONLY,
            vec![Row::new().with("read_only", 0i64)],
        )
        .with_rows(steps::SHOW_SLAVE_STATUS, vec![])
        .with_rows(
            steps::SHOW_GLOBAL_STATUS,
            vec![
                status_row("Com_select", "120"),
                status_row("Threads_running", "2"),
                status_row("Uptime", "86400"),
            ],
        )
        .with_rows(
            steps::SHOW_GLOBAL_VARIABLES,
            vec![
                status_row("max_connections", "151"),
                status_row("log_bin", "ON"),
                status_row("version", "8.0.36"),
            ],
        )
        .with_rows(
            SHOW_INNODB_STATUS,
            vec![
                Row::new()
                    .with("Type", "InnoDB")
                    .with("Name", "")
                    .with("Status", "History list length 12\nLog sequence number 1000\nLast checkpoint at 900\n"),
            ],
        )
        .with_rows(
            steps::SHOW_BINARY_LOGS,
            vec![
                Row::new()
                    .with("Log_name", "binlog.000001")
                    .with("File_size", RawValue::UInt(4096)),
            ],
        )
        .with_rows(
            steps::SHOW_PROCESSLIST,
            vec![
                Row::new()
                    .with("Id", RawValue::UInt(8))
                    .with("User", "monitor")
                    .with("Command", "Query")
                    .with("Info", steps::SHOW_PROCESSLIST),
            ],
        )
}

#[derive(Debug, Default)]
struct SessionCounters {
    connects: AtomicUsize,
    open: AtomicUsize,
    peak_open: AtomicUsize,
    graceful: AtomicUsize,
}

/// Session answering from a [`Script`].
#[derive(Debug)]
pub struct ScriptedSession {
    script: Script,
    executed: Vec<String>,
    counters: Option<Arc<SessionCounters>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::from_script(Script::new())
    }

    pub fn from_script(script: Script) -> Self {
        Self {
            script,
            executed: Vec::new(),
            counters: None,
        }
    }

    pub fn with_rows(mut self, statement: &str, rows: Vec<Row>) -> Self {
        self.script = std::mem::take(&mut self.script).with_rows(statement, rows);
        self
    }

    pub fn with_failure(mut self, statement: &str, message: impl Into<String>) -> Self {
        self.script = std::mem::take(&mut self.script).with_failure(statement, message);
        self
    }

    /// Statements executed so far.
    pub fn executed(&self) -> Vec<String> {
        self.executed.clone()
    }
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Session for ScriptedSession {
    async fn query(&mut self, statement: &str) -> Result<Vec<Row>, QueryError> {
        self.executed.push(statement.to_string());

        if let Some(delay) = self.script.delays.get(statement) {
            tokio::time::sleep(*delay).await;
        }

        match self.script.responses.get(statement) {
            Some(Response::Rows(rows)) => Ok(rows.clone()),
            Some(Response::Fail(message)) => Err(QueryError::new(statement, message)),
            None => Err(QueryError::new(statement, "no scripted response")),
        }
    }

    async fn close(self: Box<Self>) {
        if let Some(counters) = &self.counters {
            counters.graceful.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        if let Some(counters) = &self.counters {
            counters.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Connector handing out [`ScriptedSession`]s.
///
/// Clones share scripts and counters.
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    default: Script,
    per_target: Arc<HashMap<String, Script>>,
    refused: Arc<HashMap<String, String>>,
    refuse_all: Option<String>,
    counters: Arc<SessionCounters>,
}

impl ScriptedConnector {
    pub fn new(script: Script) -> Self {
        Self {
            default: script,
            per_target: Arc::new(HashMap::new()),
            refused: Arc::new(HashMap::new()),
            refuse_all: None,
            counters: Arc::new(SessionCounters::default()),
        }
    }

    /// Use `script` for the target with key `key` (`host:port`).
    pub fn with_target(mut self, key: &str, script: Script) -> Self {
        Arc::make_mut(&mut self.per_target).insert(key.to_string(), script);
        self
    }

    /// Refuse every connection.
    pub fn refuse(mut self, message: impl Into<String>) -> Self {
        self.refuse_all = Some(message.into());
        self
    }

    /// Refuse connections to the target with key `key`.
    pub fn refuse_target(mut self, key: &str, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.refused).insert(key.to_string(), message.into());
        self
    }

    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    /// Highest number of sessions open at once.
    pub fn peak_open(&self) -> usize {
        self.counters.peak_open.load(Ordering::SeqCst)
    }

    pub fn closed_gracefully(&self) -> usize {
        self.counters.graceful.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, target: &Target) -> Result<Box<dyn Session>, CollectorError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        let key = target.key().as_str();

        let refusal = self.refused.get(key).or(self.refuse_all.as_ref());
        if let Some(message) = refusal {
            return Err(CollectorError::Connection {
                target: key.to_string(),
                message: message.clone(),
            });
        }

        let open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_open.fetch_max(open, Ordering::SeqCst);

        let script = self.per_target.get(key).unwrap_or(&self.default).clone();
        let mut session = ScriptedSession::from_script(script);
        session.counters = Some(self.counters.clone());
        Ok(Box::new(session))
    }
}

/// Publisher keeping every batch in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    batches: Mutex<Vec<Vec<MetricRecord>>>,
    failing: AtomicBool,
    metric_delay: Mutex<Option<Duration>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent pushes fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Sleep before accepting batches that carry non-liveness metrics.
    pub fn set_metric_delay(&self, delay: Duration) {
        *self.metric_delay.lock() = Some(delay);
    }

    /// Batches accepted so far, in push order.
    pub fn batches(&self) -> Vec<Vec<MetricRecord>> {
        self.batches.lock().clone()
    }

    /// Accepted batches that carry metrics other than liveness.
    pub fn metric_batches(&self) -> Vec<Vec<MetricRecord>> {
        self.batches()
            .into_iter()
            .filter(|batch| batch.iter().any(|r| !r.name.starts_with("liveness.")))
            .collect()
    }

    /// Accepted liveness records (`liveness.alive`) in push order.
    pub fn alive_records(&self) -> Vec<MetricRecord> {
        self.batches()
            .into_iter()
            .flatten()
            .filter(|r| r.name == "liveness.alive")
            .collect()
    }
}

#[async_trait::async_trait]
impl Publisher for RecordingPublisher {
    async fn push(&self, metrics: &[MetricRecord]) -> Result<String, PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Transport("connection refused".to_string()));
        }
        if metrics.is_empty() {
            return Ok(String::new());
        }
        let delay = *self.metric_delay.lock();
        if let Some(delay) = delay {
            if metrics.iter().any(|r| !r.name.starts_with("liveness.")) {
                tokio::time::sleep(delay).await;
            }
        }
        self.batches.lock().push(metrics.to_vec());
        Ok(format!("{{\"accepted\":{}}}", metrics.len()))
    }
}
