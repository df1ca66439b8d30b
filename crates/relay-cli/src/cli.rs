//! CLI command definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Relay - on-demand llama.cpp serving
#[derive(Parser)]
#[command(name = "relay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path (TOML, YAML or JSON)
    #[arg(short = 'c', long, global = true, env = "RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the forwarding proxy; the backend starts on first request
    Serve {
        /// Listen host
        #[arg(long)]
        host: Option<String>,

        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Provision and start the backend before accepting requests
        #[arg(long)]
        warm_start: bool,
    },

    /// Start llama-server on each port and stream their output until Ctrl-C
    Spawn {
        /// llama-server executable (default: LLAMA_SERVER_PATH)
        #[arg(long)]
        server_path: Option<PathBuf>,

        /// GGUF model (default: LLAMA_MODEL_PATH)
        #[arg(long)]
        model_path: Option<PathBuf>,

        /// Comma-separated ports (default: LLAMA_PORTS or 8081)
        #[arg(long, value_delimiter = ',')]
        ports: Option<Vec<u16>>,

        /// Extra llama-server arguments, shell-quoted (default: LLAMA_SERVER_ARGS)
        #[arg(long, allow_hyphen_values = true)]
        args: Option<String>,
    },

    /// Verify that the server and model paths are usable
    Check {
        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Download artifacts into the work directory
    Download {
        #[command(subcommand)]
        what: DownloadCommands,
    },

    /// Stream a chat completion from a running relay
    Chat {
        /// Prompt to send
        #[arg(default_value = "Say hello in one sentence.")]
        prompt: String,

        /// Value for the X-Request-ID header
        request_id: Option<String>,

        /// Base URL of the relay
        #[arg(long, env = "RELAYSERVE_EXAMPLE_BASE", default_value = "http://127.0.0.1:8000")]
        base_url: String,

        /// Request timeout in seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
}

#[derive(Subcommand)]
pub enum DownloadCommands {
    /// Download the llama-server release bundle for this platform
    Server {
        /// Work directory (default: artifacts.work_dir)
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },

    /// Download a GGUF model from Hugging Face
    Model {
        /// Hugging Face repository
        #[arg(long)]
        repo: Option<String>,

        /// GGUF file name in the repository
        #[arg(long)]
        filename: Option<String>,

        /// Work directory (default: artifacts.work_dir)
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
}
