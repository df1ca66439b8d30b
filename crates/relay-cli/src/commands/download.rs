//! `relay download`: fetch the server bundle or a model into the work dir.

use crate::error::CliResult;
use colored::Colorize;
use relay_gateway::RelayConfig;
use relay_gateway::artifact::{ArtifactKind, ArtifactProvisioner};
use std::path::{Path, PathBuf};
use tracing::info;

pub async fn run_server(mut config: RelayConfig, work_dir: Option<PathBuf>) -> CliResult<()> {
    if let Some(dir) = work_dir {
        config.artifacts.work_dir = dir;
    }
    // Always provision into the work dir, ignoring any configured override.
    config.backend.server_path = None;

    let provisioner = ArtifactProvisioner::from_config(config.artifacts.clone(), &config.backend)?;
    println!(
        "Downloading llama-server for {} into {}",
        provisioner.platform().to_string().cyan(),
        config.artifacts.work_dir.join("bin").display()
    );

    let path = provisioner.ensure(ArtifactKind::Binary).await?;
    info!(path = %path.display(), "server ready");
    print_next("LLAMA_SERVER_PATH", &path);
    Ok(())
}

pub async fn run_model(
    mut config: RelayConfig,
    repo: Option<String>,
    filename: Option<String>,
    work_dir: Option<PathBuf>,
) -> CliResult<()> {
    if let Some(dir) = work_dir {
        config.artifacts.work_dir = dir;
    }
    if let Some(repo) = repo {
        config.artifacts.model_repo = repo;
    }
    if let Some(filename) = filename {
        config.artifacts.model_file = filename;
    }
    config.backend.model_path = None;

    let provisioner = ArtifactProvisioner::from_config(config.artifacts.clone(), &config.backend)?;
    println!(
        "Downloading {} from {} ...",
        config.artifacts.model_file.cyan(),
        config.artifacts.model_repo.cyan()
    );

    let path = provisioner.ensure(ArtifactKind::Model).await?;
    println!("Downloaded to: {}", path.display());
    print_next("LLAMA_MODEL_PATH", &path);
    Ok(())
}

fn print_next(variable: &str, path: &Path) {
    println!();
    println!("{}", "Next:".bold());
    println!("  export {}=\"{}\"", variable, path.display());
}
