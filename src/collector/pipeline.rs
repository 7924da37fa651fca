//! Per-target collection pipeline.
//!
//! One [`Pipeline::execute`] call polls one target for one tick:
//!
//! 1. read-only flag
//! 2. slave status (role)
//! 3. target identity and tags
//! 4. global status
//! 5. global variables
//! 6. storage-engine diagnostics
//! 7. merge slave metrics
//! 8. binary logs
//! 9. publish
//! 10. process list (diagnostic)
//!
//! Steps 1-8 are all-or-nothing. The whole invocation shares one absolute
//! deadline; the session is owned by the future raced against it, so an
//! expired run drops the session and with it the socket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::time::timeout_at;

use crate::collector::assembler::MetricAssembler;
use crate::collector::engine::EngineDiagnostics;
use crate::collector::{CollectorError, Connector, Session, Step, snapshot, steps};
use crate::liveness::LivenessReporter;
use crate::model::{CollectionResult, LivenessState, MetricRecord, PublishOutcome, Role};
use crate::publisher::Publisher;
use crate::target::{Target, TargetKey};

type DiagnosticError = Box<dyn std::error::Error + Send + Sync>;

/// State resolved during one invocation for one target.
#[derive(Debug, Clone)]
pub struct TickContext {
    pub key: TargetKey,
    pub role: Role,
    pub read_only: bool,
    pub assembler: MetricAssembler,
}

impl TickContext {
    fn liveness(&self) -> LivenessState {
        LivenessState::up(self.role, self.read_only)
    }
}

/// Output of the required steps.
struct Collected {
    session: Box<dyn Session>,
    context: TickContext,
    metrics: Vec<MetricRecord>,
}

/// Runs the collection steps for targets.
pub struct Pipeline {
    connector: Arc<dyn Connector>,
    publisher: Arc<dyn Publisher>,
    engine: Arc<dyn EngineDiagnostics>,
    liveness: LivenessReporter,
    step_secs: u64,
    deadline: Duration,
}

impl Pipeline {
    /// Create a pipeline.
    ///
    /// `interval` is the scheduler interval, used as the record step unless the
    /// target overrides it. `deadline` bounds every invocation.
    pub fn new(
        connector: Arc<dyn Connector>,
        publisher: Arc<dyn Publisher>,
        engine: Arc<dyn EngineDiagnostics>,
        interval: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            connector,
            liveness: LivenessReporter::new(publisher.clone()),
            publisher,
            engine,
            step_secs: interval.as_secs().max(1),
            deadline,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Poll `target` once.
    pub async fn execute(&self, target: Target) -> CollectionResult {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.deadline;
        let timestamp = Utc::now();
        let key = target.key().clone();

        tracing::debug!(target = %key, deadline = ?self.deadline, "Collection started");

        let mut resolved = None;
        let required = timeout_at(
            deadline,
            self.run_required(&target, timestamp, &mut resolved),
        )
        .await;
        let collected = match required {
            Ok(Ok(collected)) => collected,
            Ok(Err(e)) => {
                return self
                    .finish_failed(&target, timestamp, started, resolved, e)
                    .await;
            }
            Err(_) => {
                tracing::warn!(target = %key, deadline = ?self.deadline, "Deadline elapsed during required steps; connection dropped");
                let e = CollectorError::Timeout(self.deadline);
                return self
                    .finish_failed(&target, timestamp, started, resolved, e)
                    .await;
            }
        };

        let Collected {
            session,
            context,
            metrics,
        } = collected;

        let mut publish = PublishOutcome::Skipped;
        let mut diagnostic_error = None;
        let trailing = self.run_trailing(
            session,
            &target,
            &context,
            &metrics,
            &mut publish,
            &mut diagnostic_error,
        );
        if timeout_at(deadline, trailing).await.is_err() {
            if publish == PublishOutcome::Skipped {
                tracing::error!(target = %key, step = %Step::Publish, "Deadline elapsed before metrics were published; connection dropped");
                publish = PublishOutcome::Failed {
                    error: format!("deadline of {:?} elapsed before publish", self.deadline),
                };
            } else {
                tracing::warn!(target = %key, step = %Step::Processlist, "Deadline elapsed during diagnostics; connection dropped");
                diagnostic_error = Some(format!("deadline of {:?} elapsed", self.deadline));
            }
        }

        let liveness = context.liveness();
        self.liveness
            .report(&key, &liveness, &context.assembler)
            .await;

        let elapsed = started.elapsed();
        tracing::info!(
            target = %key,
            role = %context.role,
            metrics = metrics.len(),
            published = publish.is_published(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Collection finished"
        );

        CollectionResult {
            key,
            success: true,
            elapsed,
            metrics,
            error: None,
            liveness,
            publish,
            diagnostic_error,
        }
    }

    async fn finish_failed(
        &self,
        target: &Target,
        timestamp: DateTime<Utc>,
        started: Instant,
        resolved: Option<(Role, bool)>,
        error: CollectorError,
    ) -> CollectionResult {
        let key = target.key().clone();
        tracing::error!(target = %key, error = %error, "Collection failed");

        let liveness = match resolved {
            Some((role, read_only)) => LivenessState::down_as(role, read_only),
            None => LivenessState::down(),
        };
        let assembler = MetricAssembler::new(
            target,
            liveness.role,
            liveness.read_only,
            self.step_secs,
            timestamp,
        );
        self.liveness.report(&key, &liveness, &assembler).await;

        CollectionResult::failed(key, started.elapsed(), error, liveness)
    }

    /// Steps 1-8. The returned session stays open for the trailing steps.
    ///
    /// `resolved` receives role and read-only flag as soon as steps 1-2
    /// complete, so a later failure or the deadline can still report them.
    async fn run_required(
        &self,
        target: &Target,
        timestamp: DateTime<Utc>,
        resolved: &mut Option<(Role, bool)>,
    ) -> Result<Collected, CollectorError> {
        target.prepare_dirs()?;

        let mut session = self.connector.connect(target).await?;
        match self
            .required_steps(session.as_mut(), target, timestamp, resolved)
            .await
        {
            Ok((context, metrics)) => Ok(Collected {
                session,
                context,
                metrics,
            }),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    async fn required_steps(
        &self,
        session: &mut dyn Session,
        target: &Target,
        timestamp: DateTime<Utc>,
        resolved: &mut Option<(Role, bool)>,
    ) -> Result<(TickContext, Vec<MetricRecord>), CollectorError> {
        let read_only = steps::read_only(session)
            .await
            .map_err(CollectorError::step(Step::ReadOnly))?;

        let slave = steps::slave_status(session)
            .await
            .map_err(CollectorError::step(Step::SlaveStatus))?;
        let role = Role::resolve(read_only, slave.channels);
        *resolved = Some((role, read_only));

        let assembler =
            MetricAssembler::new(target, role, Some(read_only), self.step_secs, timestamp);
        let context = TickContext {
            key: target.key().clone(),
            role,
            read_only,
            assembler,
        };
        tracing::debug!(
            target = %context.key,
            endpoint = target.endpoint(),
            role = %role,
            channels = slave.channels,
            step = %Step::ResolveTag,
            "Target identity resolved"
        );

        let mut samples = steps::global_status(session)
            .await
            .map_err(CollectorError::step(Step::GlobalStatus))?;

        let variables = steps::global_variables(session)
            .await
            .map_err(CollectorError::step(Step::GlobalVariables))?;
        samples.extend(variables.samples);

        let engine = self
            .engine
            .collect(session)
            .await
            .map_err(CollectorError::step(Step::EngineStatus))?;
        tracing::trace!(target = %context.key, engine = self.engine.name(), samples = engine.len(), "Engine state read");
        samples.extend(engine);

        tracing::trace!(target = %context.key, step = %Step::MergeSlaveMetrics, samples = slave.samples.len(), "Slave metrics merged");
        samples.extend(slave.samples);

        let binlog = steps::binary_logs(session, variables.log_bin)
            .await
            .map_err(CollectorError::step(Step::BinaryLogs))?;
        samples.extend(binlog);

        let metrics = context.assembler.assemble(samples);
        Ok((context, metrics))
    }

    /// Steps 9-10. Outcomes are written through the out-parameters so they
    /// survive the future being dropped at the deadline.
    async fn run_trailing(
        &self,
        mut session: Box<dyn Session>,
        target: &Target,
        context: &TickContext,
        metrics: &[MetricRecord],
        publish: &mut PublishOutcome,
        diagnostic_error: &mut Option<String>,
    ) {
        *publish = match self.publisher.push(metrics).await {
            Ok(response) => {
                tracing::info!(target = %context.key, step = %Step::Publish, count = metrics.len(), response = %response, "Metrics published");
                PublishOutcome::Published { response }
            }
            Err(e) => {
                tracing::error!(target = %context.key, step = %Step::Publish, error = %e, "Failed to publish metrics");
                PublishOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        if let Err(e) = self
            .diagnostics(session.as_mut(), target, context.assembler.timestamp())
            .await
        {
            tracing::warn!(target = %context.key, step = %Step::Processlist, error = %e, "Diagnostic step failed");
            *diagnostic_error = Some(e.to_string());
        }

        session.close().await;
    }

    /// Step 10: read the process list and keep a snapshot when configured.
    async fn diagnostics(
        &self,
        session: &mut dyn Session,
        target: &Target,
        timestamp: DateTime<Utc>,
    ) -> Result<(), DiagnosticError> {
        let rows = steps::processlist(session).await?;
        tracing::debug!(target = %target.key(), sessions = rows.len(), "Process list read");

        let config = target.config();
        if let Some(dir) = &config.snapshot_dir {
            let path = snapshot::write_snapshot(dir, timestamp, &rows).await?;
            let purged = snapshot::purge_snapshots(dir, config.snapshot_days).await?;
            tracing::debug!(target = %target.key(), path = %path.display(), purged, "Snapshot written");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("engine", &self.engine.name())
            .field("step_secs", &self.step_secs)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::engine::{InnodbDiagnostics, SHOW_INNODB_STATUS};
    use crate::collector::{RawValue, Row};
    use crate::config::TargetConfig;
    use crate::testing::{RecordingPublisher, Script, ScriptedConnector, healthy_script};

    fn target() -> Target {
        Target::new(
            TargetConfig::new("127.0.0.1", 3306).with_endpoint("db-local"),
            "db.yaml",
        )
    }

    fn pipeline(connector: ScriptedConnector, publisher: Arc<RecordingPublisher>) -> Pipeline {
        Pipeline::new(
            Arc::new(connector),
            publisher,
            Arc::new(InnodbDiagnostics),
            Duration::from_secs(60),
            Duration::from_secs(3),
        )
    }

    #[tokio::test]
    async fn test_execute_success_publishes_metrics_then_liveness() {
        let publisher = Arc::new(RecordingPublisher::new());
        let connector = ScriptedConnector::new(healthy_script());
        let result = pipeline(connector.clone(), publisher.clone())
            .execute(target())
            .await;

        assert!(result.success);
        assert!(result.error.is_none());
        assert!(result.liveness.alive);
        assert_eq!(result.liveness.role, Role::Master);
        assert!(result.publish.is_published());
        assert!(result.diagnostic_error.is_none());

        let batches = publisher.batches();
        assert_eq!(batches.len(), 2);
        assert!(batches[0].iter().any(|r| r.name == "global_status.Com_select"));
        assert!(batches[0].iter().all(|r| r.tags["role"] == "master"));
        assert_eq!(batches[1][0].name, "liveness.alive");
        assert_eq!(connector.open_sessions(), 0);
        assert_eq!(connector.closed_gracefully(), 1);
    }

    #[tokio::test]
    async fn test_required_step_failure_discards_metrics() {
        let publisher = Arc::new(RecordingPublisher::new());
        let connector =
            ScriptedConnector::new(healthy_script().with_failure(SHOW_INNODB_STATUS, "Lost connection"));
        let result = pipeline(connector.clone(), publisher.clone())
            .execute(target())
            .await;

        assert!(!result.success);
        assert!(result.metrics.is_empty());
        assert!(matches!(
            result.error,
            Some(CollectorError::Step {
                step: Step::EngineStatus,
                ..
            })
        ));
        assert_eq!(result.publish, PublishOutcome::Skipped);
        assert!(!result.liveness.alive);

        // Only the liveness batch went out.
        let batches = publisher.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].name, "liveness.alive");
        assert_eq!(batches[0][0].value, 0.0);
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_connection_failure_marks_down() {
        let publisher = Arc::new(RecordingPublisher::new());
        let connector = ScriptedConnector::new(healthy_script()).refuse("Access denied");
        let result = pipeline(connector, publisher).execute(target()).await;

        assert!(!result.success);
        assert!(matches!(
            result.error,
            Some(CollectorError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_alive() {
        let publisher = Arc::new(RecordingPublisher::new());
        publisher.set_failing(true);
        let result = pipeline(ScriptedConnector::new(healthy_script()), publisher)
            .execute(target())
            .await;

        assert!(result.success);
        assert!(result.liveness.alive);
        assert!(matches!(result.publish, PublishOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_processlist_failure_does_not_flip_liveness() {
        let publisher = Arc::new(RecordingPublisher::new());
        let connector = ScriptedConnector::new(
            healthy_script().with_failure(steps::SHOW_PROCESSLIST, "Access denied; PROCESS"),
        );
        let result = pipeline(connector, publisher).execute(target()).await;

        assert!(result.success);
        assert!(result.liveness.alive);
        assert!(result.publish.is_published());
        assert!(result.diagnostic_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_required_step_times_out() {
        let publisher = Arc::new(RecordingPublisher::new());
        let connector = ScriptedConnector::new(
            healthy_script().with_delay(steps::SHOW_GLOBAL_STATUS, Duration::from_secs(10)),
        );
        let started = tokio::time::Instant::now();
        let result = pipeline(connector.clone(), publisher)
            .execute(target())
            .await;

        assert!(result.timed_out());
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(connector.open_sessions(), 0);
        assert_eq!(connector.closed_gracefully(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_processlist_keeps_publish_and_liveness() {
        let publisher = Arc::new(RecordingPublisher::new());
        let connector = ScriptedConnector::new(
            healthy_script().with_delay(steps::SHOW_PROCESSLIST, Duration::from_secs(10)),
        );
        let result = pipeline(connector.clone(), publisher)
            .execute(target())
            .await;

        assert!(result.success);
        assert!(result.liveness.alive);
        assert!(result.publish.is_published());
        assert!(result.diagnostic_error.is_some());
        assert_eq!(connector.open_sessions(), 0);
    }

    fn replica_script() -> Script {
        healthy_script()
            .with_rows(steps::SELECT_READ_ONLY, vec![Row::new().with("read_only", 1i64)])
            .with_rows(
                steps::SHOW_SLAVE_STATUS,
                vec![
                    Row::new()
                        .with("Slave_IO_Running", "Yes")
                        .with("Slave_SQL_Running", "Yes")
                        .with("Seconds_Behind_Master", RawValue::UInt(2)),
                ],
            )
    }

    #[tokio::test]
    async fn test_failure_after_role_resolved_keeps_role() {
        let publisher = Arc::new(RecordingPublisher::new());
        let connector = ScriptedConnector::new(
            replica_script().with_failure(SHOW_INNODB_STATUS, "Lost connection"),
        );
        let result = pipeline(connector, publisher.clone())
            .execute(target())
            .await;

        assert!(!result.success);
        assert!(!result.liveness.alive);
        assert_eq!(result.liveness.role, Role::Slave);
        assert_eq!(result.liveness.read_only, Some(true));

        let batches = publisher.batches();
        assert_eq!(batches.len(), 1);
        let records = &batches[0];
        assert!(records.iter().all(|r| r.tags["role"] == "slave"));
        assert!(records.iter().all(|r| r.tags["isSlave"] == "1"));
        assert!(records.iter().all(|r| r.tags["readOnly"] == "1"));
        let is_slave = records.iter().find(|r| r.name == "liveness.is_slave").unwrap();
        assert_eq!(is_slave.value, 1.0);
        let read_only = records.iter().find(|r| r.name == "liveness.read_only").unwrap();
        assert_eq!(read_only.value, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_required_steps_keeps_resolved_role() {
        let publisher = Arc::new(RecordingPublisher::new());
        let connector = ScriptedConnector::new(
            replica_script().with_delay(steps::SHOW_GLOBAL_STATUS, Duration::from_secs(10)),
        );
        let result = pipeline(connector, publisher).execute(target()).await;

        assert!(result.timed_out());
        assert_eq!(result.liveness.role, Role::Slave);
    }

    #[tokio::test]
    async fn test_connection_failure_role_unknown() {
        let publisher = Arc::new(RecordingPublisher::new());
        let connector = ScriptedConnector::new(healthy_script()).refuse("Access denied");
        let result = pipeline(connector, publisher.clone())
            .execute(target())
            .await;

        assert_eq!(result.liveness.role, Role::Unknown);
        assert_eq!(result.liveness.read_only, None);
        let batches = publisher.batches();
        assert!(batches[0].iter().all(|r| r.tags["role"] == "unknown"));
        assert!(batches[0].iter().all(|r| !r.tags.contains_key("readOnly")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_publish_is_failed_publish_and_alive() {
        let publisher = Arc::new(RecordingPublisher::new());
        publisher.set_metric_delay(Duration::from_secs(10));
        let connector = ScriptedConnector::new(healthy_script());
        let started = tokio::time::Instant::now();
        let result = pipeline(connector.clone(), publisher.clone())
            .execute(target())
            .await;

        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(result.success);
        assert!(result.liveness.alive);
        assert!(matches!(result.publish, PublishOutcome::Failed { .. }));
        assert!(result.diagnostic_error.is_none());
        assert_eq!(connector.open_sessions(), 0);
        assert_eq!(connector.closed_gracefully(), 0);

        // The metric batch never landed; liveness still went out.
        assert!(publisher.metric_batches().is_empty());
        let alive = publisher.alive_records();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].value, 1.0);
    }

    #[tokio::test]
    async fn test_slave_role_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = dir.path().join("snap");
        let target = Target::new(
            TargetConfig::new("127.0.0.1", 3307).with_snapshot_dir(&snapshots),
            "replica.yaml",
        );
        let publisher = Arc::new(RecordingPublisher::new());
        let result = pipeline(ScriptedConnector::new(replica_script()), publisher)
            .execute(target)
            .await;

        assert_eq!(result.liveness.role, Role::Slave);
        assert!(result.metrics.iter().any(|r| r.name == "slave_status.Seconds_Behind_Master" && r.value == 2.0));
        assert!(result.metrics.iter().all(|r| r.tags["isSlave"] == "1"));
        assert_eq!(std::fs::read_dir(&snapshots).unwrap().count(), 1);
    }
}
