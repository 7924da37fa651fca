//! dbmon - Scheduled MySQL Health Collector
//!
//! Polls MySQL-compatible servers on a fixed, wall-clock aligned interval and
//! pushes their internal state to an Open-Falcon / Nightingale style agent.
//! It can be used as a library or run as the `dbmon` binary.
//!
//! # Architecture
//!
//! - **Scheduler**: Aligned tick, target enumeration, bounded worker pool
//! - **Collector**: Per-target pipeline under a hard deadline
//! - **Publisher**: JSON push to the agent
//! - **Liveness**: Up/down and role per target per tick
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dbmon::{
//!     AppConfig, HttpPublisher, InnodbDiagnostics, MySqlConnector, Pipeline, Schedule,
//!     Scheduler, WorkerPool,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! let pipeline = Pipeline::new(
//!     Arc::new(MySqlConnector::new()),
//!     Arc::new(HttpPublisher::from_config(&config.agent)?),
//!     Arc::new(InnodbDiagnostics),
//!     config.interval,
//!     config.deadline,
//! );
//! let scheduler = Scheduler::new(
//!     config.target_source()?,
//!     pipeline,
//!     WorkerPool::new(config.pool_config()),
//! )
//! .await?;
//! scheduler.start(Schedule::aligned(config.interval)).await?;
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod liveness;
pub mod model;
pub mod publisher;
pub mod scheduler;
pub mod server;
pub mod target;
#[doc(hidden)]
pub mod testing;

pub use collector::{
    CollectorError, Connector, EngineDiagnostics, InnodbDiagnostics, MetricAssembler,
    MySqlConnector, Pipeline, QueryError, RawValue, Row, Session, Step,
};
pub use config::{AppConfig, ConfigError, TargetConfig};
pub use liveness::LivenessReporter;
pub use model::{
    CollectionResult, LivenessState, MetricKind, MetricRecord, PublishOutcome, Role, Tags,
};
pub use publisher::{HttpPublisher, PublishError, Publisher, to_agent_payload};
pub use scheduler::{
    BackpressurePolicy, PoolConfig, PoolStats, Schedule, Scheduler, SchedulerError, SubmitError,
    WorkerPool,
};
pub use target::{Target, TargetKey, TargetSource};
