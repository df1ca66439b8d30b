//! Layered configuration for the relay.
//!
//! Sources, later ones winning:
//!
//! 1. built-in defaults ([`RelayConfig::default`])
//! 2. an optional config file (TOML, YAML or JSON, detected from the extension)
//! 3. `RELAY_*` environment variables, `__` separating nested keys
//!    (`RELAY_SERVER__PORT=9000`, `RELAY_BACKEND__PORTS=8081,8082`)
//! 4. the legacy variable names read by the setup scripts:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `LLAMA_SERVER_PATH` | `backend.server_path` |
//! | `LLAMA_MODEL_PATH` | `backend.model_path` |
//! | `LLAMA_PORTS` | `backend.ports` (comma-separated) |
//! | `LLAMA_SERVER_ARGS` | `backend.extra_args` (shell-style split) |
//! | `MODAL_LLAMA_MODEL_REPO` | `artifacts.model_repo` |
//! | `MODAL_LLAMA_MODEL_FILE` | `artifacts.model_file` |

use crate::backend::ReadinessPolicy;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SERVICE_NAME: &str = "relay-llama-server";
pub const DEFAULT_MODEL_REPO: &str = "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF";
pub const DEFAULT_MODEL_FILE: &str = "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf";
pub const DEFAULT_RELEASE_API_URL: &str =
    "https://api.github.com/repos/ggml-org/llama.cpp/releases/latest";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parsing error: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Top-level configuration shared by the proxy server and the CLI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerSettings,
    pub backend: BackendSettings,
    pub artifacts: ArtifactSettings,
    pub readiness: ReadinessSettings,
    pub proxy: ProxySettings,
}

/// Where the public proxy listens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Reported by `GET /ping` and `GET /`.
    pub service_name: String,
    /// Run `ensure_ready()` at boot instead of on the first request.
    pub warm_start: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            warm_start: false,
        }
    }
}

/// How llama-server processes are launched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Explicit server executable. Provisioned into the work dir when unset.
    pub server_path: Option<PathBuf>,
    /// Explicit GGUF model. Provisioned into the work dir when unset.
    pub model_path: Option<PathBuf>,
    /// Bind host of the single supervised backend.
    pub host: String,
    /// Port of the single supervised backend.
    pub port: u16,
    /// Ports for the multi-backend runner.
    pub ports: Vec<u16>,
    pub extra_args: Vec<String>,
    /// `-c` for the supervised backend.
    pub context_size: Option<u32>,
    /// `-ngl` for the supervised backend.
    pub gpu_layers: Option<u32>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            server_path: None,
            model_path: None,
            host: "127.0.0.1".to_string(),
            port: 8080,
            ports: vec![8081],
            extra_args: Vec::new(),
            context_size: Some(512),
            gpu_layers: Some(99),
        }
    }
}

/// Where artifacts come from and where they are cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSettings {
    pub work_dir: PathBuf,
    pub release_api_url: String,
    pub model_repo: String,
    pub model_file: String,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("llama_work"),
            release_api_url: DEFAULT_RELEASE_API_URL.to_string(),
            model_repo: DEFAULT_MODEL_REPO.to_string(),
            model_file: DEFAULT_MODEL_FILE.to_string(),
        }
    }
}

impl ArtifactSettings {
    pub fn model_url(&self) -> String {
        format!(
            "https://huggingface.co/{}/resolve/main/{}",
            self.model_repo, self.model_file
        )
    }
}

/// Readiness probe budget, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessSettings {
    pub interval_ms: u64,
    pub max_attempts: u32,
    pub probe_timeout_ms: u64,
    pub grace_ms: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            max_attempts: 90,
            probe_timeout_ms: 2_000,
            grace_ms: 5_000,
        }
    }
}

impl ReadinessSettings {
    pub fn policy(&self) -> ReadinessPolicy {
        ReadinessPolicy {
            interval: Duration::from_millis(self.interval_ms),
            max_attempts: self.max_attempts,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            grace: Duration::from_millis(self.grace_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub request_timeout_secs: u64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 120,
        }
    }
}

impl ProxySettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RelayConfig {
    /// Load from defaults, `path`, and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Like [`load`](Self::load) but legacy variables are read through `lookup`.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Config::builder().add_source(Config::try_from(&RelayConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("backend.ports"),
        );

        let mut config: RelayConfig = builder.build()?.try_deserialize()?;
        config.apply_env_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the legacy `LLAMA_*` / `MODAL_*` variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(path) = non_empty("LLAMA_SERVER_PATH") {
            self.backend.server_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty("LLAMA_MODEL_PATH") {
            self.backend.model_path = Some(PathBuf::from(path));
        }
        if let Some(ports) = lookup("LLAMA_PORTS") {
            self.backend.ports = parse_ports(&ports)?;
        }
        if let Some(args) = lookup("LLAMA_SERVER_ARGS") {
            self.backend.extra_args = split_args(&args)?;
        }
        if let Some(repo) = non_empty("MODAL_LLAMA_MODEL_REPO") {
            self.artifacts.model_repo = repo;
        }
        if let Some(file) = non_empty("MODAL_LLAMA_MODEL_FILE") {
            self.artifacts.model_file = file;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.service_name.trim().is_empty() {
            return Err(ConfigError::invalid("server.service_name", "must not be empty"));
        }
        if self.backend.ports.is_empty() {
            return Err(ConfigError::invalid("backend.ports", "at least one port is required"));
        }
        if self.proxy.request_timeout_secs == 0 {
            return Err(ConfigError::invalid("proxy.request_timeout_secs", "must be positive"));
        }
        Ok(())
    }
}

/// Parse a comma-separated port list, ignoring blank entries.
pub fn parse_ports(value: &str) -> Result<Vec<u16>, ConfigError> {
    let ports = value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<u16>()
                .map_err(|e| ConfigError::invalid("LLAMA_PORTS", format!("'{p}': {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if ports.is_empty() {
        return Err(ConfigError::invalid("LLAMA_PORTS", "no ports given"));
    }
    Ok(ports)
}

/// Split a command line the way a POSIX shell would for plain words,
/// single quotes, double quotes and backslash escapes.
pub fn split_args(value: &str) -> Result<Vec<String>, ConfigError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(ConfigError::invalid("LLAMA_SERVER_ARGS", "unterminated single quote")),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err(ConfigError::invalid("LLAMA_SERVER_ARGS", "unterminated double quote")),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(ConfigError::invalid("LLAMA_SERVER_ARGS", "unterminated double quote")),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(ch) = chars.next() {
                    current.push(ch);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}
