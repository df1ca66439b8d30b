//! Axum-based HTTP proxy server.
//!
//! [`RelayServer`] wires the forwarding proxy and the backend supervisor
//! into a running axum service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service name and endpoint list. |
//! | `GET`  | `/health` | Liveness check, always `200 OK`. |
//! | `GET`  | `/ping` | `{"pong": true, "service": ...}` |
//! | `PUT`  | `/config` | Acknowledged, no effect. |
//! | `POST` | `/completion` | Forwarded to the backend's `/completion`. |
//! | `POST` | `/v1/chat/completions` | Forwarded; event streams are relayed as they arrive. |
//!
//! No backend is started until the first forwarded request, unless warm
//! start is enabled.

use crate::backend::ProcessSupervisor;
use crate::config::RelayConfig;
use crate::error::GatewayResult;
use crate::handlers::{health_router, proxy_router};
use crate::proxy::ForwardingProxy;
use crate::state::AppState;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub struct RelayServer {
    config: RelayConfig,
    supervisor: Arc<ProcessSupervisor>,
    proxy: Arc<ForwardingProxy>,
}

impl RelayServer {
    pub fn new(config: RelayConfig, supervisor: Arc<ProcessSupervisor>) -> Self {
        let proxy = Arc::new(ForwardingProxy::new(
            supervisor.clone(),
            config.proxy.request_timeout(),
        ));
        Self {
            config,
            supervisor,
            proxy,
        }
    }

    /// Server with the real provisioner and launcher.
    pub fn from_config(config: RelayConfig) -> GatewayResult<Self> {
        let supervisor = Arc::new(ProcessSupervisor::from_config(&config)?);
        Ok(Self::new(config, supervisor))
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn build_app(&self) -> Router {
        let state = Arc::new(AppState::new(
            self.proxy.clone(),
            self.config.server.service_name.clone(),
        ));

        Router::new()
            .merge(health_router())
            .merge(proxy_router())
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn start<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves, then
    /// stop the backend.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = listener.local_addr()?;
        info!(%addr, service = %self.config.server.service_name, "relay server starting");

        if self.config.server.warm_start {
            info!("warm start: preparing backend before accepting requests");
            match self.supervisor.ensure_ready().await {
                Ok(endpoint) => info!(base_url = %endpoint.base_url, "backend warm"),
                Err(e) => error!(error = %e, "warm start failed, will retry on first request"),
            }
        }

        let app = self.build_app();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        info!("relay server stopped, shutting down backend");
        self.supervisor.shutdown().await;
        result
    }
}
