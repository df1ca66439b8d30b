//! `relay spawn`: run llama-server on each configured port until Ctrl-C.

use crate::error::{CliError, CliResult};
use colored::Colorize;
use relay_gateway::RelayConfig;
use relay_gateway::backend::{MultiBackendRunner, RunnerConfig};
use relay_gateway::config::split_args;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn run(
    config: RelayConfig,
    server_path: Option<PathBuf>,
    model_path: Option<PathBuf>,
    ports: Option<Vec<u16>>,
    args: Option<String>,
) -> CliResult<()> {
    let runner_config = resolve(config, server_path, model_path, ports, args)?;
    for spec in runner_config.specs() {
        println!("{} {}", "Starting:".bold(), spec.command_line());
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, stopping backends"),
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
        }
        on_signal.cancel();
    });

    let runner = MultiBackendRunner::new(runner_config);
    println!("Backends running. Ctrl+C to stop.");
    let outcome = runner
        .run(cancel, |line| println!("[{}] {}", line.port.to_string().cyan(), line.line))
        .await?;

    for (port, status) in outcome.exits {
        match status {
            Some(status) => info!(port, %status, "backend stopped"),
            None => warn!(port, "backend exit status unknown"),
        }
    }
    Ok(())
}

/// Merge flags over configuration. Both paths are required.
pub fn resolve(
    config: RelayConfig,
    server_path: Option<PathBuf>,
    model_path: Option<PathBuf>,
    ports: Option<Vec<u16>>,
    args: Option<String>,
) -> CliResult<RunnerConfig> {
    let server_path = server_path.or(config.backend.server_path);
    let model_path = model_path.or(config.backend.model_path);
    let (Some(server_path), Some(model_path)) = (server_path, model_path) else {
        return Err(CliError::MissingConfig(
            "Set LLAMA_SERVER_PATH and LLAMA_MODEL_PATH.".to_string(),
        ));
    };

    let ports = match ports {
        Some(ports) if !ports.is_empty() => ports,
        _ => config.backend.ports,
    };
    let extra_args = match args {
        Some(args) => split_args(&args)?,
        None => config.backend.extra_args,
    };

    Ok(RunnerConfig::new(server_path, model_path, ports, extra_args))
}
