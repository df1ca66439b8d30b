//! Request forwarding to the supervised backend.
//!
//! [`ForwardingProxy`] makes sure a backend is ready, then relays the
//! request body verbatim. Bodies are never parsed. Outcomes:
//!
//! | Backend answer | Client sees |
//! |----------------|-------------|
//! | 2xx/3xx, JSON or other | status, content type and body unchanged |
//! | 2xx `text/event-stream` | the same bytes, streamed as they arrive |
//! | 4xx | relayed verbatim |
//! | 5xx, transport error, timeout | 502 `{"error": ..., "content": ""}` |
//!
//! The first request after boot pays for provisioning and backend startup.

use crate::backend::ProcessSupervisor;
use crate::error::{GatewayError, GatewayResult};
use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// An inbound request to forward.
#[derive(Debug, Clone, Default)]
pub struct ProxyRequest {
    pub body: Bytes,
    /// Value of `X-Request-ID`, echoed back when present.
    pub correlation_id: Option<String>,
}

pub enum ProxyBody {
    Full(Bytes),
    Stream(BoxStream<'static, Result<Bytes, reqwest::Error>>),
}

impl std::fmt::Debug for ProxyBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyBody::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            ProxyBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

#[derive(Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: ProxyBody,
    pub correlation_id: Option<String>,
}

impl ProxyResponse {
    /// The 502 envelope for `err`.
    pub fn error(err: &GatewayError, correlation_id: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            content_type: Some("application/json".to_string()),
            body: ProxyBody::Full(Bytes::from(err.envelope().to_string())),
            correlation_id,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.body, ProxyBody::Stream(_))
    }

    /// Collect the whole body. Streams are read to the end.
    pub async fn into_bytes(self) -> Result<Bytes, reqwest::Error> {
        match self.body {
            ProxyBody::Full(bytes) => Ok(bytes),
            ProxyBody::Stream(mut stream) => {
                let mut buf = Vec::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        let body = match self.body {
            ProxyBody::Full(bytes) => Body::from(bytes),
            ProxyBody::Stream(stream) => Body::from_stream(stream),
        };
        let mut response = Response::new(body);
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        if let Some(value) = self.content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        if let Some(value) = self.correlation_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
        response
    }
}

fn is_event_stream(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("text/event-stream"))
        .unwrap_or(false)
}

/// Forwards request bodies to the supervised llama-server.
pub struct ForwardingProxy {
    supervisor: Arc<ProcessSupervisor>,
    client: Client,
    timeout: Duration,
}

impl ForwardingProxy {
    pub fn new(supervisor: Arc<ProcessSupervisor>, timeout: Duration) -> Self {
        Self::with_client(supervisor, Client::new(), timeout)
    }

    pub fn with_client(supervisor: Arc<ProcessSupervisor>, client: Client, timeout: Duration) -> Self {
        Self {
            supervisor,
            client,
            timeout,
        }
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    /// Forward `req` to the backend's `path`. Never fails: errors become the
    /// 502 envelope.
    #[instrument(skip(self, req), fields(request_id = req.correlation_id.as_deref().unwrap_or("-")))]
    pub async fn handle(&self, path: &str, req: ProxyRequest) -> ProxyResponse {
        match self.forward(path, &req).await {
            Ok(mut response) => {
                response.correlation_id = req.correlation_id;
                response
            }
            Err(e) => {
                warn!(error = %e, "forwarding failed");
                ProxyResponse::error(&e, req.correlation_id)
            }
        }
    }

    async fn forward(&self, path: &str, req: &ProxyRequest) -> GatewayResult<ProxyResponse> {
        let endpoint = self.supervisor.ensure_ready().await?;
        // sending and every body read share one deadline
        let deadline = Instant::now() + self.timeout;
        let url = format!("{}{}", endpoint.base_url, path);
        debug!(%url, bytes = req.body.len(), "forwarding to backend");

        let mut builder = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(req.body.clone());
        if let Some(id) = &req.correlation_id {
            builder = builder.header(REQUEST_ID_HEADER, id);
        }

        let upstream = tokio::time::timeout_at(deadline, builder.send())
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| GatewayError::Forwarding(format!("backend request failed: {e}")))?;

        let status = upstream.status();
        let content_type = upstream
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if status.is_server_error() {
            let detail = tokio::time::timeout_at(deadline, upstream.text())
                .await
                .map_err(|_| self.timed_out())?
                .unwrap_or_default();
            return Err(GatewayError::Forwarding(format!(
                "backend returned {status}: {}",
                detail.trim()
            )));
        }

        if status.is_success() && is_event_stream(content_type.as_deref()) {
            debug!("relaying event stream");
            return Ok(ProxyResponse {
                status,
                content_type,
                body: ProxyBody::Stream(upstream.bytes_stream().boxed()),
                correlation_id: None,
            });
        }

        let body = tokio::time::timeout_at(deadline, upstream.bytes())
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| GatewayError::Forwarding(format!("failed to read backend response: {e}")))?;

        Ok(ProxyResponse {
            status,
            content_type,
            body: ProxyBody::Full(body),
            correlation_id: None,
        })
    }

    fn timed_out(&self) -> GatewayError {
        GatewayError::Forwarding(format!(
            "backend did not respond within {}s",
            self.timeout.as_secs()
        ))
    }
}
