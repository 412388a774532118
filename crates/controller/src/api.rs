//! Health, readiness and metrics endpoints served next to the control loops

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use controller_lib::{ControllerMetrics, HealthRegistry};
use std::sync::Arc;
use tracing::{info, warn};

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ControllerMetrics,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: ControllerMetrics) -> Self {
        Self {
            health_registry,
            metrics,
        }
    }
}

type SharedState = Arc<AppState>;

fn status_for(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// 200 while at least one workload is operational, 503 otherwise
async fn liveness(State(state): State<SharedState>) -> Response {
    let health = state.health_registry.health().await;
    (status_for(health.status.is_operational()), Json(health)).into_response()
}

/// 200 once startup finished and until shutdown begins
async fn readiness(State(state): State<SharedState>) -> Response {
    let readiness = state.health_registry.readiness().await;
    (status_for(readiness.ready), Json(readiness)).into_response()
}

async fn exposition(State(state): State<SharedState>) -> Response {
    match state.metrics.encode_text() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(exposition))
        .with_state(state)
}

/// Bind the API port and serve until the task is aborted
pub async fn serve(port: u16, state: SharedState) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "API server listening");

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
