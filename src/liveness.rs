//! Liveness reporting.
//!
//! Every pipeline run ends with a liveness push, whether or not the metric
//! push succeeded. Liveness is sent as its own batch so a rejected metric
//! batch cannot take it down with it.

use std::sync::Arc;

use crate::collector::{Category, MetricAssembler, Sample};
use crate::model::{LivenessState, MetricRecord, PublishOutcome};
use crate::publisher::Publisher;
use crate::target::TargetKey;

impl LivenessState {
    /// Render the state as `liveness.*` records.
    pub fn to_records(&self, assembler: &MetricAssembler) -> Vec<MetricRecord> {
        let mut samples = vec![
            Sample::gauge(Category::Liveness, "alive", i64::from(self.alive)),
            Sample::gauge(Category::Liveness, "is_slave", i64::from(self.is_slave())),
        ];
        if let Some(read_only) = self.read_only {
            samples.push(Sample::gauge(
                Category::Liveness,
                "read_only",
                i64::from(read_only),
            ));
        }
        assembler.assemble(samples)
    }
}

/// Emits per-tick liveness through a publisher.
#[derive(Clone)]
pub struct LivenessReporter {
    publisher: Arc<dyn Publisher>,
}

impl LivenessReporter {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    /// Log and push the liveness of one target.
    pub async fn report(
        &self,
        key: &TargetKey,
        state: &LivenessState,
        assembler: &MetricAssembler,
    ) -> PublishOutcome {
        if state.alive {
            tracing::info!(target = %key, role = %state.role, read_only = ?state.read_only, "Target alive");
        } else {
            tracing::warn!(target = %key, "Target down");
        }

        let records = state.to_records(assembler);
        match self.publisher.push(&records).await {
            Ok(response) => PublishOutcome::Published { response },
            Err(e) => {
                tracing::error!(target = %key, error = %e, "Failed to push liveness");
                PublishOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

impl std::fmt::Debug for LivenessReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessReporter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;
    use crate::model::Role;
    use crate::target::Target;
    use crate::testing::RecordingPublisher;
    use chrono::Utc;

    fn assembler(role: Role, read_only: Option<bool>) -> MetricAssembler {
        let target = Target::new(TargetConfig::new("127.0.0.1", 3306), "db.yaml");
        MetricAssembler::new(&target, role, read_only, 60, Utc::now())
    }

    #[test]
    fn test_to_records_up_slave() {
        let state = LivenessState::up(Role::Slave, true);
        let records = state.to_records(&assembler(Role::Slave, Some(true)));
        let values: Vec<_> = records.iter().map(|r| (r.name.as_str(), r.value)).collect();
        assert_eq!(
            values,
            vec![
                ("liveness.alive", 1.0),
                ("liveness.is_slave", 1.0),
                ("liveness.read_only", 1.0),
            ]
        );
    }

    #[test]
    fn test_to_records_down() {
        let records = LivenessState::down().to_records(&assembler(Role::Unknown, None));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, 0.0);
        assert_eq!(records[0].tags["role"], "unknown");
    }

    #[tokio::test]
    async fn test_report_publish_failure_is_outcome() {
        let publisher = Arc::new(RecordingPublisher::new());
        publisher.set_failing(true);
        let reporter = LivenessReporter::new(publisher.clone());

        let outcome = reporter
            .report(
                &TargetKey::new("127.0.0.1", 3306),
                &LivenessState::up(Role::Master, false),
                &assembler(Role::Master, Some(false)),
            )
            .await;
        assert!(matches!(outcome, PublishOutcome::Failed { .. }));
        assert!(publisher.batches().is_empty());
    }
}
