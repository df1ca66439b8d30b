//! Request handlers for the proxy API

pub mod health;
pub mod proxy;

pub use health::health_router;
pub use proxy::proxy_router;
