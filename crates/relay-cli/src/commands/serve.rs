//! `relay serve`: run the forwarding proxy.

use crate::error::CliResult;
use relay_gateway::RelayConfig;
use relay_gateway::server::RelayServer;
use tracing::info;

pub async fn run(
    mut config: RelayConfig,
    host: Option<String>,
    port: Option<u16>,
    warm_start: bool,
) -> CliResult<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.server.warm_start |= warm_start;

    let server = RelayServer::from_config(config)?;
    server
        .start(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl-C received, shutting down");
        })
        .await?;
    Ok(())
}
