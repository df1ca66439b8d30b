use relay_gateway::config::ConfigError;
use relay_gateway::{BackendStartError, GatewayError, ProvisionError};

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    /// A required setting is absent.
    #[error("{0}")]
    MissingConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Download failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Backend error: {0}")]
    BackendStart(#[from] BackendStartError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("{0} check(s) failed")]
    CheckFailed(usize),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code: 2 for missing configuration, 1 for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::MissingConfig(_) => 2,
            _ => 1,
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;
