//! Bounded worker pool with per-target single-flight.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::config::{DEFAULT_BLOCK_TIMEOUT, default_workers};
use crate::target::TargetKey;

/// What `submit` does when every queue slot is taken.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BackpressurePolicy {
    /// Reject immediately.
    #[default]
    Drop,
    /// Wait up to the block timeout for a slot, then reject.
    Block,
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of jobs running at once.
    pub capacity: usize,
    /// Jobs allowed to wait for a worker.
    pub queue_depth: usize,
    pub backpressure: BackpressurePolicy,
    /// Longest wait for a slot under [`BackpressurePolicy::Block`].
    pub block_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let capacity = default_workers();
        Self {
            capacity,
            queue_depth: capacity,
            backpressure: BackpressurePolicy::default(),
            block_timeout: DEFAULT_BLOCK_TIMEOUT,
        }
    }
}

/// Reasons a submission was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// A job for the same key is queued or running.
    #[error("previous run still in progress for {0}")]
    AlreadyRunning(TargetKey),

    /// No queue slot was free.
    #[error("worker pool queue full, dropping {0}")]
    QueueFull(TargetKey),

    /// The pool no longer accepts work.
    #[error("worker pool closed")]
    Closed,
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    /// Idle workers.
    pub free: usize,
    pub running: usize,
    /// Accepted jobs waiting for a worker.
    pub queued: usize,
    /// Keys currently queued or running.
    pub in_flight: usize,
}

#[derive(Debug)]
struct Shared {
    in_flight: Mutex<HashSet<TargetKey>>,
    running: AtomicUsize,
    idle: Notify,
}

/// Clears the single-flight marker however the job ends.
struct InFlightGuard {
    shared: Arc<Shared>,
    key: TargetKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let empty = {
            let mut in_flight = self.shared.in_flight.lock();
            in_flight.remove(&self.key);
            in_flight.is_empty()
        };
        if empty {
            self.shared.idle.notify_waiters();
        }
    }
}

struct RunningGuard(Arc<Shared>);

impl RunningGuard {
    fn new(shared: Arc<Shared>) -> Self {
        shared.running.fetch_add(1, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs at most `capacity` jobs at once, one per [`TargetKey`].
///
/// A submitted job first takes a queue slot (capacity + queue depth in total),
/// then waits for a worker permit inside its own task, so `submit` never waits
/// on a running job.
#[derive(Debug)]
pub struct WorkerPool {
    config: PoolConfig,
    workers: Arc<Semaphore>,
    slots: Arc<Semaphore>,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        let capacity = config.capacity.max(1);
        let slots = capacity + config.queue_depth;
        Self {
            workers: Arc::new(Semaphore::new(capacity)),
            slots: Arc::new(Semaphore::new(slots)),
            shared: Arc::new(Shared {
                in_flight: Mutex::new(HashSet::new()),
                running: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
            closed: AtomicBool::new(false),
            config: PoolConfig {
                capacity,
                ..config
            },
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Queue `job` under `key`.
    ///
    /// # Errors
    /// - `AlreadyRunning` if a job for `key` has not finished yet
    /// - `QueueFull` if no slot became free under the backpressure policy
    /// - `Closed` after [`WorkerPool::close`]
    pub async fn submit<F>(&self, key: TargetKey, job: F) -> Result<(), SubmitError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubmitError::Closed);
        }

        if !self.shared.in_flight.lock().insert(key.clone()) {
            return Err(SubmitError::AlreadyRunning(key));
        }
        let guard = InFlightGuard {
            shared: self.shared.clone(),
            key: key.clone(),
        };

        let slot = self.acquire_slot(&key).await?;

        let workers = self.workers.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let _slot = slot;
            let Ok(_worker) = workers.acquire_owned().await else {
                return;
            };
            let _running = RunningGuard::new(shared);
            job.await;
        });

        Ok(())
    }

    async fn acquire_slot(&self, key: &TargetKey) -> Result<OwnedSemaphorePermit, SubmitError> {
        match self.config.backpressure {
            BackpressurePolicy::Drop => match self.slots.clone().try_acquire_owned() {
                Ok(permit) => Ok(permit),
                Err(TryAcquireError::NoPermits) => Err(SubmitError::QueueFull(key.clone())),
                Err(TryAcquireError::Closed) => Err(SubmitError::Closed),
            },
            BackpressurePolicy::Block => {
                let acquire = self.slots.clone().acquire_owned();
                match tokio::time::timeout(self.config.block_timeout, acquire).await {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_)) => Err(SubmitError::Closed),
                    Err(_) => Err(SubmitError::QueueFull(key.clone())),
                }
            }
        }
    }

    /// Whether a job for `key` is queued or running.
    pub fn is_in_flight(&self, key: &TargetKey) -> bool {
        self.shared.in_flight.lock().contains(key)
    }

    pub fn stats(&self) -> PoolStats {
        let capacity = self.config.capacity;
        let running = self.shared.running.load(Ordering::SeqCst);
        let total_slots = capacity + self.config.queue_depth;
        let occupied = total_slots.saturating_sub(self.slots.available_permits());
        PoolStats {
            capacity,
            free: self.workers.available_permits(),
            running,
            queued: occupied.saturating_sub(running),
            in_flight: self.shared.in_flight.lock().len(),
        }
    }

    /// Wait until no job is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.shared.in_flight.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting new jobs. Accepted jobs still run.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
