//! Backend process lifecycle.

use crate::error::BackendStartError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle state of a backend process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    NotStarted,
    Starting,
    Ready,
    Failed,
    Stopped,
}

impl std::fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackendStatus::NotStarted => "not_started",
            BackendStatus::Starting => "starting",
            BackendStatus::Ready => "ready",
            BackendStatus::Failed => "failed",
            BackendStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Everything needed to start one llama-server.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub model: PathBuf,
    pub host: String,
    pub port: u16,
    pub context_size: Option<u32>,
    pub gpu_layers: Option<u32>,
    pub extra_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Arguments after the executable:
    /// `-m <model> --host <host> --port <port> [-c N] [-ngl N] [extra...]`
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            self.model.to_string_lossy().into_owned(),
            "--host".to_string(),
            self.host.clone(),
            "--port".to_string(),
            self.port.to_string(),
        ];
        if let Some(ctx) = self.context_size {
            args.push("-c".to_string());
            args.push(ctx.to_string());
        }
        if let Some(ngl) = self.gpu_layers {
            args.push("-ngl".to_string());
            args.push(ngl.to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Printable command line, quoting words that need it.
    pub fn command_line(&self) -> String {
        std::iter::once(self.executable.to_string_lossy().into_owned())
            .chain(self.args())
            .map(|word| quote_word(&word))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The executable's parent, when the executable path is absolute.
    pub fn executable_dir(executable: &Path) -> Option<PathBuf> {
        if executable.is_absolute() {
            executable.parent().map(Path::to_path_buf)
        } else {
            None
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

fn quote_word(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,+@%".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// A spawned backend, killed when dropped.
pub struct BackendProcess {
    port: u16,
    child: Child,
    status: BackendStatus,
    working_directory: Option<PathBuf>,
}

impl BackendProcess {
    pub fn spawn(spec: &LaunchSpec) -> Result<Self, BackendStartError> {
        let child = spec.command().spawn().map_err(|source| BackendStartError::Launch {
            executable: spec.executable.clone(),
            port: spec.port,
            source,
        })?;
        info!(port = spec.port, pid = ?child.id(), "backend process spawned");
        Ok(Self::from_child(spec.port, child, spec.working_dir.clone()))
    }

    /// Wrap an already spawned child.
    pub fn from_child(port: u16, child: Child, working_directory: Option<PathBuf>) -> Self {
        Self {
            port,
            child,
            status: BackendStatus::Starting,
            working_directory,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn status(&self) -> BackendStatus {
        self.status
    }

    pub fn set_status(&mut self, status: BackendStatus) {
        self.status = status;
    }

    pub fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    /// Exit status if the process has already exited.
    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!(port = self.port, error = %e, "failed to poll backend process");
                None
            }
        }
    }

    pub fn is_alive(&mut self) -> bool {
        self.try_exit().is_none()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Ask the process to exit, wait up to `grace`, then kill it.
    pub async fn terminate(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.try_exit() {
            self.status = BackendStatus::Stopped;
            return Some(status);
        }

        self.request_stop();
        let status = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!(port = self.port, error = %e, "wait on backend failed");
                None
            }
            Err(_) => {
                warn!(port = self.port, grace_ms = grace.as_millis() as u64, "backend ignored termination, killing");
                if let Err(e) = self.child.kill().await {
                    warn!(port = self.port, error = %e, "kill failed");
                }
                self.try_exit()
            }
        };
        self.status = BackendStatus::Stopped;
        debug!(port = self.port, status = ?status, "backend stopped");
        status
    }

    #[cfg(unix)]
    fn request_stop(&mut self) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        match self.child.id() {
            Some(pid) => {
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    warn!(port = self.port, pid, error = %e, "SIGTERM failed");
                }
            }
            None => {
                let _ = self.child.start_kill();
            }
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!(port = self.port, error = %e, "kill failed");
        }
    }
}

impl std::fmt::Debug for BackendProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendProcess")
            .field("port", &self.port)
            .field("pid", &self.child.id())
            .field("status", &self.status)
            .field("working_directory", &self.working_directory)
            .finish()
    }
}

/// Read `reader` line by line on a separate task until EOF.
pub fn pump_lines<R, F>(reader: R, mut on_line: F) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: FnMut(String) + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => on_line(line),
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "output stream closed");
                    break;
                }
            }
        }
    })
}

/// Starts backend processes.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<BackendProcess, BackendStartError>;
}

/// [`Launcher`] that runs the real executable.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLauncher;

#[async_trait]
impl Launcher for CommandLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<BackendProcess, BackendStartError> {
        BackendProcess::spawn(spec)
    }
}
