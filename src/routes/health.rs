//! `GET/HEAD /health` and `GET /` (§6).

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::dto::{HealthResponse, RootResponse};
use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = if state.is_degraded() { "degraded" } else { "healthy" };
    Json(HealthResponse {
        status,
        agent_count: state.list_cached_agents().len(),
        timestamp: chrono::Utc::now(),
    })
}

pub async fn health_head() -> StatusCode {
    StatusCode::OK
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        service: "mcp-mesh-registry",
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
    })
}
