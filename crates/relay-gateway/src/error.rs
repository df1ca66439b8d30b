//! Gateway error types
//!
//! Provisioning and startup failures stay local to the supervisor; at the
//! HTTP boundary every [`GatewayError`] collapses into the same 502 envelope:
//!
//! ```json
//! { "error": "<message>", "content": "" }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Why an artifact could not be made available locally.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("network failure fetching {url}: {message}")]
    NetworkFailure { url: String, message: String },

    #[error("no release asset matches platform '{0}'")]
    NoMatchingAsset(String),

    #[error("failed to extract {}: {message}", archive.display())]
    ExtractionFailure { archive: PathBuf, message: String },

    #[error("'{name}' not found under {}", root.display())]
    BinaryNotFound { name: String, root: PathBuf },

    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    pub(crate) fn network(url: &str, err: impl std::fmt::Display) -> Self {
        ProvisionError::NetworkFailure {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProvisionError::Storage {
            path: path.into(),
            source,
        }
    }
}

/// The backend process could not be brought up.
///
/// Fatal for the current readiness attempt only; the next call to
/// `ensure_ready()` starts over.
#[derive(Debug, Error)]
pub enum BackendStartError {
    #[error("failed to launch {} on port {port}: {source}", executable.display())]
    Launch {
        executable: PathBuf,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("backend on port {port} exited during startup ({status})")]
    Exited { port: u16, status: String },
}

/// Gateway-level errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    BackendStart(#[from] BackendStartError),

    #[error("{0}")]
    Forwarding(String),
}

impl GatewayError {
    /// Body of the client-visible error envelope.
    pub fn envelope(&self) -> serde_json::Value {
        json!({
            "error": self.to_string(),
            "content": "",
        })
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_GATEWAY, Json(self.envelope())).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
