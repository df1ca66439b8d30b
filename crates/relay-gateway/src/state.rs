//! Shared application state for the proxy server

use crate::proxy::ForwardingProxy;
use std::sync::Arc;

/// State shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<ForwardingProxy>,
    /// Reported by `/` and `/ping`.
    pub service_name: String,
}

impl AppState {
    pub fn new(proxy: Arc<ForwardingProxy>, service_name: impl Into<String>) -> Self {
        Self {
            proxy,
            service_name: service_name.into(),
        }
    }
}
