//! Relay CLI - serve, spawn and provision llama.cpp backends

mod cli;
mod commands;
mod error;

use clap::Parser;
use cli::{Cli, Commands, DownloadCommands};
use colored::Colorize;
use error::CliResult;
use relay_gateway::RelayConfig;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so backend output and export lines stay clean on stdout.
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{} failed to start runtime: {}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run_command_async(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run_command_async(cli: Cli) -> CliResult<()> {
    let load = || RelayConfig::load(cli.config.as_deref());

    match cli.command {
        Commands::Serve {
            host,
            port,
            warm_start,
        } => commands::serve::run(load()?, host, port, warm_start).await,

        Commands::Spawn {
            server_path,
            model_path,
            ports,
            args,
        } => commands::spawn::run(load()?, server_path, model_path, ports, args).await,

        Commands::Check { json } => commands::check::run(&load()?, json),

        Commands::Download { what } => match what {
            DownloadCommands::Server { work_dir } => commands::download::run_server(load()?, work_dir).await,
            DownloadCommands::Model {
                repo,
                filename,
                work_dir,
            } => commands::download::run_model(load()?, repo, filename, work_dir).await,
        },

        Commands::Chat {
            prompt,
            request_id,
            base_url,
            timeout,
        } => commands::chat::run(&base_url, &prompt, request_id.as_deref(), timeout).await,
    }
}
