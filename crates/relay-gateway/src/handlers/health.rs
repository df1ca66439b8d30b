//! Service endpoints that never touch the backend
//!
//! GET /        - service index
//! GET /health  - liveness probe
//! GET /ping    - name check
//! PUT /config  - accepted and ignored

use axum::{
    Json,
    body::Bytes,
    extract::State,
    response::IntoResponse,
    routing::{get, put},
};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::state::AppState;

pub const ENDPOINTS: [&str; 6] = [
    "GET /",
    "GET /health",
    "GET /ping",
    "PUT /config",
    "POST /completion",
    "POST /v1/chat/completions",
];

/// GET /
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "app": state.service_name,
        "endpoints": ENDPOINTS,
    }))
}

/// GET /health
///
/// Always 200 while the server is up, whether or not a backend is running.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// GET /ping
pub async fn ping(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "pong": true, "service": state.service_name }))
}

/// PUT /config
pub async fn config(body: Bytes) -> impl IntoResponse {
    debug!(bytes = body.len(), "config update acknowledged");
    Json(json!({ "ok": true, "message": "Config acknowledged" }))
}

pub fn health_router() -> axum::Router<Arc<AppState>> {
    axum::Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/ping", get(ping))
        .route("/config", put(config))
}
