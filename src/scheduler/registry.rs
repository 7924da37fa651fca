//! Tick scheduler: enumerate targets and hand them to the worker pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use super::pool::{PoolStats, SubmitError, WorkerPool};
use super::schedule::Schedule;
use super::SchedulerError;
use crate::collector::Pipeline;
use crate::config::ConfigError;
use crate::target::TargetSource;

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Period of the pool statistics log.
const STATS_PERIOD: Duration = Duration::from_secs(1);

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickSummary {
    /// Targets enumerated.
    pub targets: usize,
    pub submitted: usize,
    /// Skipped because the previous run is still in flight.
    pub already_running: usize,
    /// Rejected by backpressure.
    pub dropped: usize,
    /// Config files that failed to load.
    pub invalid_configs: usize,
}

struct Inner {
    source: TargetSource,
    pipeline: Arc<Pipeline>,
    pool: Arc<WorkerPool>,
    fatal: CancellationToken,
    ticks: AtomicU64,
}

/// Fires ticks and submits every target to the worker pool.
///
/// Uses `tokio-cron-scheduler` for the trigger; the tick callback only
/// enumerates and submits, it never waits on a pipeline.
pub struct Scheduler {
    scheduler: JobScheduler,
    inner: Arc<Inner>,
    stop: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler.
    pub async fn new(
        source: TargetSource,
        pipeline: Pipeline,
        pool: WorkerPool,
    ) -> Result<Self, SchedulerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        Ok(Self {
            scheduler,
            inner: Arc::new(Inner {
                source,
                pipeline: Arc::new(pipeline),
                pool: Arc::new(pool),
                fatal: CancellationToken::new(),
                ticks: AtomicU64::new(0),
            }),
            stop: CancellationToken::new(),
        })
    }

    /// Run one tick now.
    ///
    /// # Errors
    /// Returns `SchedulerError::SourceMissing` if the target source vanished;
    /// the fatal signal is raised as well.
    pub async fn tick(&self) -> Result<TickSummary, SchedulerError> {
        run_tick(&self.inner).await
    }

    /// Register the tick job and start firing, plus the statistics reporter.
    pub async fn start(&self, schedule: Schedule) -> Result<uuid::Uuid, SchedulerError> {
        let job = self.create_job(&schedule)?;
        let job_id = self
            .scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        self.scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        tokio::spawn(report_stats(self.inner.pool.clone(), self.stop.clone()));

        tracing::info!(job_id = %job_id, schedule = %schedule, "Scheduler started");
        Ok(job_id)
    }

    /// Token cancelled when the scheduler hits an unrecoverable error.
    pub fn fatal_signal(&self) -> CancellationToken {
        self.inner.fatal.clone()
    }

    pub fn pool(&self) -> Arc<WorkerPool> {
        self.inner.pool.clone()
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Ticks fired so far.
    pub fn ticks(&self) -> u64 {
        self.inner.ticks.load(Ordering::SeqCst)
    }

    /// Gracefully shutdown with the default timeout.
    pub async fn shutdown(self) -> Result<(), SchedulerError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop firing, refuse new work and wait for running pipelines.
    pub async fn shutdown_with_timeout(mut self, timeout: Duration) -> Result<(), SchedulerError> {
        self.inner.pool.close();
        self.stop.cancel();

        self.scheduler
            .shutdown()
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        let in_flight = self.inner.pool.stats().in_flight;
        if tokio::time::timeout(timeout, self.inner.pool.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(in_flight, "Scheduler shutdown timed out with pipelines still running");
        } else {
            tracing::info!("Scheduler shutdown complete");
        }
        Ok(())
    }

    fn create_job(&self, schedule: &Schedule) -> Result<Job, SchedulerError> {
        let inner = self.inner.clone();
        let callback = move |_: uuid::Uuid, _: JobScheduler| {
            let inner = inner.clone();
            Box::pin(async move {
                if let Err(e) = run_tick(&inner).await {
                    tracing::error!(error = %e, "Tick failed");
                }
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        };

        match schedule {
            Schedule::Interval(d) => Job::new_repeated_async(*d, callback),
            Schedule::Cron(expr) => Job::new_cron_job_async(expr, callback),
        }
        .map_err(|e| SchedulerError::Scheduler(e.to_string()))
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("source", &self.inner.source)
            .field("ticks", &self.ticks())
            .finish_non_exhaustive()
    }
}

async fn run_tick(inner: &Arc<Inner>) -> Result<TickSummary, SchedulerError> {
    let tick = inner.ticks.fetch_add(1, Ordering::SeqCst) + 1;

    let enumeration = match inner.source.enumerate() {
        Ok(enumeration) => enumeration,
        Err(ConfigError::SourceMissing(path)) => {
            tracing::error!(tick, path = %path.display(), "Target source is gone; shutting down");
            inner.fatal.cancel();
            return Err(SchedulerError::SourceMissing(path));
        }
        Err(e) => return Err(SchedulerError::Config(e)),
    };

    let mut summary = TickSummary {
        targets: enumeration.targets.len(),
        invalid_configs: enumeration.skipped.len(),
        ..TickSummary::default()
    };

    for target in enumeration.targets {
        let key = target.key().clone();
        let pipeline = inner.pipeline.clone();
        let job = async move {
            pipeline.execute(target).await;
        };

        match inner.pool.submit(key.clone(), job).await {
            Ok(()) => summary.submitted += 1,
            Err(SubmitError::AlreadyRunning(_)) => {
                tracing::warn!(tick, target = %key, "Previous run still in progress, skipping");
                summary.already_running += 1;
            }
            Err(e @ SubmitError::QueueFull(_)) => {
                tracing::warn!(tick, target = %key, error = %e, "Submission dropped");
                summary.dropped += 1;
            }
            Err(SubmitError::Closed) => {
                tracing::debug!(tick, "Worker pool closed, ending tick");
                break;
            }
        }
    }

    tracing::debug!(
        tick,
        targets = summary.targets,
        submitted = summary.submitted,
        already_running = summary.already_running,
        dropped = summary.dropped,
        "Tick dispatched"
    );
    Ok(summary)
}

async fn report_stats(pool: Arc<WorkerPool>, stop: CancellationToken) {
    let mut interval = tokio::time::interval(STATS_PERIOD);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {
                let stats = pool.stats();
                tracing::debug!(
                    capacity = stats.capacity,
                    free = stats.free,
                    running = stats.running,
                    queued = stats.queued,
                    "Worker pool stats"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::InnodbDiagnostics;
    use crate::scheduler::{BackpressurePolicy, PoolConfig};
    use crate::testing::{RecordingPublisher, ScriptedConnector, healthy_script};
    use std::path::Path;

    fn pipeline() -> Pipeline {
        Pipeline::new(
            Arc::new(ScriptedConnector::new(healthy_script())),
            Arc::new(RecordingPublisher::new()),
            Arc::new(InnodbDiagnostics),
            Duration::from_secs(60),
            Duration::from_secs(3),
        )
    }

    fn pool() -> WorkerPool {
        WorkerPool::new(PoolConfig {
            capacity: 2,
            queue_depth: 2,
            backpressure: BackpressurePolicy::Drop,
            block_timeout: Duration::from_millis(10),
        })
    }

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "host: 10.0.0.1\n");

        let scheduler = Scheduler::new(
            TargetSource::Dir(dir.path().to_path_buf()),
            pipeline(),
            pool(),
        )
        .await
        .unwrap();

        let job_id = scheduler
            .start(Schedule::interval(Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(!job_id.is_nil());
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_tick_counts_invalid_configs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "host: 10.0.0.1\n");
        write(dir.path(), "b.yaml", "host: [\n");

        let scheduler = Scheduler::new(
            TargetSource::Dir(dir.path().to_path_buf()),
            pipeline(),
            pool(),
        )
        .await
        .unwrap();

        let summary = scheduler.tick().await.unwrap();
        assert_eq!(summary.targets, 1);
        assert_eq!(summary.submitted, 1);
        assert_eq!(summary.invalid_configs, 1);
        scheduler.pool().wait_idle().await;
        assert_eq!(scheduler.ticks(), 1);
    }

    #[tokio::test]
    async fn test_missing_source_raises_fatal_signal() {
        let dir = tempfile::tempdir().unwrap();
        let targets = dir.path().join("targets");
        std::fs::create_dir(&targets).unwrap();

        let scheduler = Scheduler::new(TargetSource::Dir(targets.clone()), pipeline(), pool())
            .await
            .unwrap();
        let fatal = scheduler.fatal_signal();

        std::fs::remove_dir(&targets).unwrap();
        let err = scheduler.tick().await.unwrap_err();
        assert!(matches!(err, SchedulerError::SourceMissing(_)));
        assert!(fatal.is_cancelled());
    }
}
