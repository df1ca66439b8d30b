//! Several backends on a list of ports, run until cancelled.

use super::process::{BackendProcess, CommandLauncher, LaunchSpec, Launcher, pump_lines};
use crate::error::BackendStartError;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_RUNNER_HOST: &str = "0.0.0.0";

/// How long output readers get to reach EOF once the processes are stopped.
const OUTPUT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub executable: PathBuf,
    pub model: PathBuf,
    pub ports: Vec<u16>,
    pub extra_args: Vec<String>,
    pub host: String,
    /// How long each process gets to exit after the termination request.
    pub shutdown_grace: Duration,
}

impl RunnerConfig {
    pub fn new(executable: PathBuf, model: PathBuf, ports: Vec<u16>, extra_args: Vec<String>) -> Self {
        Self {
            executable,
            model,
            ports,
            extra_args,
            host: DEFAULT_RUNNER_HOST.to_string(),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    /// One launch spec per port, in port order as given.
    pub fn specs(&self) -> Vec<LaunchSpec> {
        let working_dir = LaunchSpec::executable_dir(&self.executable);
        self.ports
            .iter()
            .map(|&port| LaunchSpec {
                executable: self.executable.clone(),
                model: self.model.clone(),
                host: self.host.clone(),
                port,
                context_size: None,
                gpu_layers: None,
                extra_args: self.extra_args.clone(),
                working_dir: working_dir.clone(),
            })
            .collect()
    }
}

/// One line of backend output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendLine {
    pub port: u16,
    pub line: String,
}

#[derive(Debug)]
pub struct RunOutcome {
    /// Exit status per port after shutdown; `None` if it could not be collected.
    pub exits: Vec<(u16, Option<ExitStatus>)>,
}

pub struct MultiBackendRunner {
    config: RunnerConfig,
    launcher: Arc<dyn Launcher>,
}

impl MultiBackendRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_launcher(config, Arc::new(CommandLauncher))
    }

    pub fn with_launcher(config: RunnerConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self { config, launcher }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Start every backend, hand their output to `sink` until `cancel` fires,
    /// then stop them all.
    ///
    /// If any launch fails the processes already started are stopped and the
    /// launch error is returned. Output printed while stopping, including a
    /// backend's reply to the termination signal, still reaches `sink`.
    ///
    /// Children are only cleaned up on paths where this future completes or
    /// is dropped (`kill_on_drop`). If the runner itself is killed
    /// forcibly, e.g. with SIGKILL, its backends are orphaned and keep running.
    pub async fn run<F>(&self, cancel: CancellationToken, mut sink: F) -> Result<RunOutcome, BackendStartError>
    where
        F: FnMut(BackendLine),
    {
        let mut processes: Vec<BackendProcess> = Vec::with_capacity(self.config.ports.len());
        for spec in self.config.specs() {
            match self.launcher.launch(&spec).await {
                Ok(process) => processes.push(process),
                Err(e) => {
                    warn!(port = spec.port, error = %e, "launch failed, stopping started backends");
                    stop_all(&mut processes, self.config.shutdown_grace).await;
                    return Err(e);
                }
            }
        }
        info!(count = processes.len(), "backends running");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pumps = Vec::with_capacity(processes.len() * 2);
        for process in processes.iter_mut() {
            let port = process.port();
            if let Some(stdout) = process.take_stdout() {
                let tx = tx.clone();
                pumps.push(pump_lines(stdout, move |line| {
                    let _ = tx.send(BackendLine { port, line });
                }));
            }
            if let Some(stderr) = process.take_stderr() {
                let tx = tx.clone();
                pumps.push(pump_lines(stderr, move |line| {
                    let _ = tx.send(BackendLine { port, line });
                }));
            }
        }
        drop(tx);

        let mut streams_open = true;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = rx.recv(), if streams_open => match line {
                    Some(line) => sink(line),
                    None => {
                        warn!("all backend output streams closed");
                        streams_open = false;
                    }
                },
            }
        }

        info!("stopping backends");
        let exits = stop_all(&mut processes, self.config.shutdown_grace).await;
        flush_output(&mut pumps).await;
        while let Some(line) = rx.recv().await {
            sink(line);
        }
        Ok(RunOutcome { exits })
    }
}

/// Wait for every reader to hit EOF; abort the ones still blocked (an
/// inherited pipe held open by a grandchild) so the channel closes.
async fn flush_output(pumps: &mut [JoinHandle<()>]) {
    let readers = futures::future::join_all(pumps.iter_mut());
    if tokio::time::timeout(OUTPUT_FLUSH_TIMEOUT, readers).await.is_err() {
        warn!("backend output did not close after shutdown, dropping the rest");
        for pump in pumps.iter() {
            pump.abort();
        }
    }
}

async fn stop_all(processes: &mut [BackendProcess], grace: Duration) -> Vec<(u16, Option<ExitStatus>)> {
    let stops = processes.iter_mut().map(|p| async move {
        let status = p.terminate(grace).await;
        (p.port(), status)
    });
    futures::future::join_all(stops).await
}
