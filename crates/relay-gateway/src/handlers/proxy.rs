//! Forwarded endpoints
//!
//! POST /completion           - llama.cpp native completion
//! POST /v1/chat/completions  - OpenAI-compatible chat, streaming or not

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
};
use std::sync::Arc;

use crate::proxy::{ProxyRequest, REQUEST_ID_HEADER};
use crate::state::AppState;

fn proxy_request(headers: &HeaderMap, body: Bytes) -> ProxyRequest {
    let correlation_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    ProxyRequest {
        body,
        correlation_id,
    }
}

/// POST /completion
pub async fn completion(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    state.proxy.handle("/completion", proxy_request(&headers, body)).await
}

/// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    state
        .proxy
        .handle("/v1/chat/completions", proxy_request(&headers, body))
        .await
}

pub fn proxy_router() -> axum::Router<Arc<AppState>> {
    axum::Router::new()
        .route("/completion", post(completion))
        .route("/v1/chat/completions", post(chat_completions))
}
