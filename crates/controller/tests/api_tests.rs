//! Integration tests for the controller API endpoints

#[path = "../src/api.rs"]
#[allow(dead_code)]
mod api;

use api::{create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use controller_lib::{ControllerMetrics, HealthRegistry};
use std::sync::Arc;
use tower::ServiceExt;

const HELLO: &str = "default/hello";
const CHECKOUT: &str = "prod/checkout";

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new(2);
    health_registry.register(HELLO).await;
    health_registry.register(CHECKOUT).await;

    let state = Arc::new(AppState::new(health_registry, ControllerMetrics::new()));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health["components"][HELLO].is_object());
    assert!(health["components"][CHECKOUT].is_object());
}

#[tokio::test]
async fn test_healthz_ok_when_one_workload_failing() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .record_failure(HELLO, "platform unavailable")
        .await;
    state
        .health_registry
        .record_failure(HELLO, "platform unavailable")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    // One unhealthy workload degrades the controller, it does not kill it
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"][HELLO]["status"], "unhealthy");
    assert_eq!(health["components"][HELLO]["consecutive_failures"], 2);
}

#[tokio::test]
async fn test_healthz_returns_503_when_all_unhealthy() {
    let (app, state) = setup_test_app().await;

    for workload in [HELLO, CHECKOUT] {
        for _ in 0..2 {
            state
                .health_registry
                .record_failure(workload, "decision endpoint timed out")
                .await;
        }
    }

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state) = setup_test_app().await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;

    state.metrics.record_cycle(HELLO, "applied", 0.2);
    state.metrics.record_failure(HELLO, "decision_timeout");
    state.metrics.observe_decision_latency(0.05);
    state.metrics.set_replica_target(HELLO, 4);

    let (status, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    let metrics_text = String::from_utf8(body).unwrap();
    assert!(metrics_text.contains("scaling_controller_cycles_total"));
    assert!(metrics_text.contains("scaling_controller_cycle_failures_total"));
    assert!(metrics_text.contains("scaling_controller_decision_latency_seconds_bucket"));
    assert!(metrics_text.contains("scaling_controller_replica_target"));
    assert!(metrics_text.contains(r#"workload="default/hello""#));
}

#[tokio::test]
async fn test_metrics_content_type_is_prometheus_text() {
    let (app, state) = setup_test_app().await;
    state.metrics.set_backoff(CHECKOUT, 8);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        prometheus::TEXT_FORMAT
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains(r#"scaling_controller_backoff_seconds{workload="prod/checkout"} 8"#));
}
