//! Local diagnostic HTTP endpoint.
//!
//! Exposes liveness of the process itself and worker pool occupancy. Bound to
//! loopback by default and disabled unless `--diag` is given.

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::scheduler::{PoolStats, WorkerPool};

/// Shared diagnostic state.
#[derive(Debug, Clone)]
pub struct DiagState {
    pub pool: Arc<WorkerPool>,
    pub started_at: Instant,
}

impl DiagState {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            started_at: Instant::now(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Pool statistics response.
#[derive(Debug, Serialize)]
struct StatsResponse {
    uptime_secs: u64,
    pool: PoolStats,
}

/// Create the diagnostic router.
pub fn create_router(state: DiagState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(Arc::new(state))
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn stats_handler(State(state): State<Arc<DiagState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        pool: state.pool.stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::PoolConfig;

    async fn serve() -> std::net::SocketAddr {
        let pool = Arc::new(WorkerPool::new(PoolConfig {
            capacity: 3,
            queue_depth: 1,
            ..PoolConfig::default()
        }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(DiagState::new(pool)))
                .await
                .unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_healthz() {
        let addr = serve().await;
        let body: serde_json::Value = reqwest::get(format!("http://{addr}/healthz"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_stats_reports_pool() {
        let addr = serve().await;
        let body: serde_json::Value = reqwest::get(format!("http://{addr}/stats"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["pool"]["capacity"], 3);
        assert_eq!(body["pool"]["free"], 3);
        assert_eq!(body["pool"]["running"], 0);
    }
}
