//! Collector Layer
//!
//! Per-target data collection against MySQL-compatible servers.
//!
//! # Architecture
//!
//! - [`Connector`] / [`Session`]: Exclusively-owned connection for one run
//! - [`Pipeline`]: Ordered collection steps under one deadline
//! - [`EngineDiagnostics`]: Storage-engine state strategy ([`InnodbDiagnostics`])
//! - [`MetricAssembler`]: Samples to tagged [`crate::model::MetricRecord`]s
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use std::path::Path;
//! use dbmon::{HttpPublisher, InnodbDiagnostics, MySqlConnector, Pipeline, Target};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let publisher = HttpPublisher::new("http://127.0.0.1:1988/v1/push", Duration::from_secs(5))?;
//! let pipeline = Pipeline::new(
//!     Arc::new(MySqlConnector::new()),
//!     Arc::new(publisher),
//!     Arc::new(InnodbDiagnostics),
//!     Duration::from_secs(60),
//!     Duration::from_secs(30),
//! );
//! let target = Target::load(Path::new("etc/db-05.yaml"))?;
//! let result = pipeline.execute(target).await;
//! println!("alive: {}", result.liveness.alive);
//! # Ok(())
//! # }
//! ```

mod assembler;
pub mod engine;
mod mysql;
mod pipeline;
pub mod snapshot;
pub mod steps;
mod traits;

pub use assembler::{Category, MetricAssembler, Sample, coerce};
pub use engine::{EngineDiagnostics, InnodbDiagnostics};
pub use mysql::{MySqlConnector, MySqlSession};
pub use pipeline::{Pipeline, TickContext};
pub use traits::{CollectorError, Connector, QueryError, RawValue, Row, Session, Step};
