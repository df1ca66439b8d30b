//! `relay-gateway`: on-demand llama.cpp backend supervision and request
//! forwarding.
//!
//! | Component | Type |
//! |-----------|------|
//! | Artifact provisioning | [`artifact::ArtifactProvisioner`] |
//! | Single supervised backend | [`backend::ProcessSupervisor`] |
//! | Several backends on fixed ports | [`backend::MultiBackendRunner`] |
//! | Request forwarding | [`proxy::ForwardingProxy`] |
//! | HTTP surface | [`server::RelayServer`] |
//! | Streaming chat client | [`stream::stream_chat`] |
//!
//! A request flows `RelayServer` → `ForwardingProxy` →
//! `ProcessSupervisor::ensure_ready()` → (`ArtifactProvisioner` when files
//! are missing) → spawn and probe → forward → response or 502 envelope.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use relay_gateway::config::RelayConfig;
//! use relay_gateway::server::RelayServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::load(None)?;
//!     let server = RelayServer::from_config(config)?;
//!     server
//!         .start(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod backend;
pub mod config;
pub mod error;
pub mod handlers;
pub mod proxy;
pub mod server;
pub mod state;
pub mod stream;

pub use config::RelayConfig;
pub use error::{BackendStartError, GatewayError, GatewayResult, ProvisionError};
