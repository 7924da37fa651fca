//! Push Agent Integration Tests
//!
//! Run the HTTP publisher against a local axum stub of the falcon agent.

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use dbmon::testing::{ScriptedConnector, healthy_script};
use dbmon::{HttpPublisher, InnodbDiagnostics, Pipeline, PublishError, Publisher, Target, TargetConfig};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;

// =============================================================================
// Test Helpers
// =============================================================================

#[derive(Clone, Default)]
struct AgentStub {
    received: Arc<Mutex<Vec<Value>>>,
    status: Arc<Mutex<Option<StatusCode>>>,
}

async fn push_handler(
    State(stub): State<AgentStub>,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    if let Some(status) = *stub.status.lock() {
        return (status, "agent overloaded".to_string());
    }
    let count = body.as_array().map_or(0, Vec::len);
    stub.received.lock().push(body);
    (StatusCode::OK, format!("success: {count}"))
}

/// Start the stub agent and return its push URL.
async fn start_agent(stub: AgentStub) -> String {
    let router = Router::new()
        .route("/v1/push", post(push_handler))
        .with_state(stub);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{}/v1/push", addr)
}

fn pipeline(url: &str) -> Pipeline {
    Pipeline::new(
        Arc::new(ScriptedConnector::new(healthy_script())),
        Arc::new(HttpPublisher::new(url, Duration::from_secs(2)).unwrap()),
        Arc::new(InnodbDiagnostics),
        Duration::from_secs(60),
        Duration::from_secs(5),
    )
}

fn target() -> Target {
    Target::new(
        TargetConfig::new("10.0.0.5", 3306).with_endpoint("db-05"),
        "db-05.yaml",
    )
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_pipeline_pushes_metrics_and_liveness() {
    let stub = AgentStub::default();
    let url = start_agent(stub.clone()).await;

    let result = pipeline(&url).execute(target()).await;
    assert!(result.success);
    assert!(result.publish.is_published());

    let received = stub.received.lock().clone();
    assert_eq!(received.len(), 2);

    let metrics = received[0].as_array().unwrap();
    let com_select = metrics
        .iter()
        .find(|item| item["metric"] == "global_status.Com_select")
        .expect("Com_select pushed");
    assert_eq!(com_select["endpoint"], "db-05");
    assert_eq!(com_select["counterType"], "COUNTER");
    assert_eq!(com_select["step"], 60);
    assert_eq!(com_select["value"], 120.0);
    let tags = com_select["tags"].as_str().unwrap();
    assert!(tags.contains("role=master"));
    assert!(tags.contains("target=10.0.0.5:3306"));
    assert!(tags.contains("type=mysql"));

    let liveness = received[1].as_array().unwrap();
    assert_eq!(liveness[0]["metric"], "liveness.alive");
    assert_eq!(liveness[0]["value"], 1.0);
    assert_eq!(liveness[0]["counterType"], "GAUGE");
}

#[tokio::test]
async fn test_agent_error_is_publish_failure_not_down() {
    let stub = AgentStub::default();
    *stub.status.lock() = Some(StatusCode::SERVICE_UNAVAILABLE);
    let url = start_agent(stub.clone()).await;

    let result = pipeline(&url).execute(target()).await;
    assert!(result.success);
    assert!(result.liveness.alive);
    assert!(!result.publish.is_published());
}

#[tokio::test]
async fn test_publisher_returns_status_error() {
    let stub = AgentStub::default();
    *stub.status.lock() = Some(StatusCode::BAD_GATEWAY);
    let url = start_agent(stub).await;

    let records = {
        let result = pipeline("http://127.0.0.1:9/v1/push").execute(target()).await;
        result.metrics
    };
    let publisher = HttpPublisher::new(&url, Duration::from_secs(2)).unwrap();
    match publisher.push(&records).await {
        Err(PublishError::Status { status, body }) => {
            assert_eq!(status, 502);
            assert_eq!(body, "agent overloaded");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_agent_keeps_alive() {
    let result = pipeline("http://127.0.0.1:9/v1/push").execute(target()).await;
    assert!(result.success);
    assert!(result.liveness.alive);
    assert!(!result.publish.is_published());
}
