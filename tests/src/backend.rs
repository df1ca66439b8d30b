//! A stand-in llama-server speaking just enough of its HTTP API.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// One request the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedRequest {
    pub path: String,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub request_id: Option<String>,
}

/// Canned answer for `/completion` and non-streaming chat.
#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl Default for CannedResponse {
    fn default() -> Self {
        Self {
            status: 200,
            content_type: "application/json".to_string(),
            body: json!({ "content": "Hello from the mock backend", "stop": true }).to_string(),
        }
    }
}

/// Deltas the streaming chat endpoint emits, in order.
pub const STREAM_DELTAS: [&str; 2] = ["H", "i"];

/// The exact bytes of a streamed chat response.
pub fn sse_body() -> String {
    let mut body = String::new();
    body.push_str(&format!(
        "data: {}\n\n",
        json!({ "choices": [{ "index": 0, "delta": { "role": "assistant" } }] })
    ));
    for delta in STREAM_DELTAS {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({ "choices": [{ "index": 0, "delta": { "content": delta } }] })
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[derive(Default)]
struct MockState {
    received: Mutex<Vec<ReceivedRequest>>,
    completion: Mutex<CannedResponse>,
    health_probes: AtomicUsize,
    /// `/health` and `/slots` answer 503 until this many probes have been seen.
    ready_after: AtomicUsize,
}

impl MockState {
    fn record(&self, path: &str, headers: &HeaderMap, body: Bytes) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let request = ReceivedRequest {
            path: path.to_string(),
            body,
            content_type: header("content-type"),
            request_id: header("x-request-id"),
        };
        if let Ok(mut received) = self.received.lock() {
            received.push(request);
        }
    }

    fn canned(&self) -> CannedResponse {
        self.completion
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

/// Mock llama-server bound to an ephemeral localhost port.
///
/// The socket is bound on construction but requests are only answered once
/// [`serve`](Self::serve) runs, the way a real backend only answers after it
/// has been launched.
pub struct MockBackend {
    state: Arc<MockState>,
    addr: SocketAddr,
    listener: Mutex<Option<std::net::TcpListener>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl MockBackend {
    pub fn bind() -> Result<Arc<Self>> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").context("bind mock backend")?;
        let addr = listener.local_addr()?;
        Ok(Arc::new(Self {
            state: Arc::new(MockState::default()),
            addr,
            listener: Mutex::new(Some(listener)),
            shutdown: Mutex::new(None),
        }))
    }

    /// Bind and serve immediately.
    pub async fn start() -> Result<Arc<Self>> {
        let backend = Self::bind()?;
        backend.serve()?;
        Ok(backend)
    }

    /// Start answering requests. Returns `false` if already serving.
    pub fn serve(&self) -> Result<bool> {
        let Some(listener) = self.listener.lock().ok().and_then(|mut l| l.take()) else {
            return Ok(false);
        };
        listener.set_nonblocking(true)?;
        let listener = tokio::net::TcpListener::from_std(listener)?;

        let (tx, rx) = oneshot::channel();
        if let Ok(mut shutdown) = self.shutdown.lock() {
            *shutdown = Some(tx);
        }

        let app = router(self.state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
        });
        Ok(true)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.state
            .received
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn set_completion_response(&self, status: u16, content_type: &str, body: &str) {
        if let Ok(mut completion) = self.state.completion.lock() {
            *completion = CannedResponse {
                status,
                content_type: content_type.to_string(),
                body: body.to_string(),
            };
        }
    }

    /// Report "loading" for the first `probes` readiness probes.
    pub fn set_ready_after(&self, probes: usize) {
        self.state.ready_after.store(probes, Ordering::SeqCst);
    }

    pub fn health_probes(&self) -> usize {
        self.state.health_probes.load(Ordering::SeqCst)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.lock().ok().and_then(|mut s| s.take()) {
            let _ = tx.send(());
        }
    }
}

fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/slots", get(slots))
        .route("/completion", post(completion))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state)
}

fn loading(state: &MockState) -> bool {
    let seen = state.health_probes.fetch_add(1, Ordering::SeqCst);
    seen < state.ready_after.load(Ordering::SeqCst)
}

async fn health(State(state): State<Arc<MockState>>) -> Response {
    if loading(&state) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": { "code": 503, "message": "Loading model" } })),
        )
            .into_response();
    }
    Json(json!({ "status": "ok" })).into_response()
}

async fn slots(State(state): State<Arc<MockState>>) -> Response {
    if loading(&state) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!([{ "id": 0, "is_processing": false }])).into_response()
}

fn canned_response(canned: CannedResponse) -> Response {
    let status = StatusCode::from_u16(canned.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, canned.content_type)], canned.body).into_response()
}

async fn completion(State(state): State<Arc<MockState>>, headers: HeaderMap, body: Bytes) -> Response {
    state.record("/completion", &headers, body);
    canned_response(state.canned())
}

async fn chat_completions(State(state): State<Arc<MockState>>, headers: HeaderMap, body: Bytes) -> Response {
    let streaming = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| v.get("stream").and_then(Value::as_bool))
        .unwrap_or(false);
    state.record("/v1/chat/completions", &headers, body);

    if !streaming {
        return canned_response(state.canned());
    }

    let chunks: Vec<Result<Bytes, std::io::Error>> = sse_body()
        .split_inclusive("\n\n")
        .map(|event| Ok(Bytes::from(event.to_string())))
        .collect();
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        axum::body::Body::from_stream(futures::stream::iter(chunks)),
    )
        .into_response()
}
