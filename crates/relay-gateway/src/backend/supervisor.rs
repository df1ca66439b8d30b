//! Single-backend supervision.
//!
//! The supervisor owns at most one llama-server. The first caller of
//! [`ProcessSupervisor::ensure_ready`] provisions artifacts, spawns the
//! process and waits for readiness while holding the slot lock; everyone
//! arriving meanwhile queues on the same lock and then sees the result.
//!
//! Lifecycle status is published on a separate `watch` channel so it can be
//! read while a start is in progress.

use super::probe::{Readiness, ReadinessPolicy, ReadinessProbe};
use super::process::{BackendProcess, BackendStatus, CommandLauncher, LaunchSpec, Launcher, pump_lines};
use crate::artifact::{ArtifactKind, ArtifactProvisioner};
use crate::config::{BackendSettings, RelayConfig};
use crate::error::{GatewayError, GatewayResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Where a ready backend can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoint {
    pub base_url: String,
    pub port: u16,
    pub readiness: Readiness,
}

struct BackendSlot {
    process: Option<BackendProcess>,
    readiness: Option<Readiness>,
    drains: Vec<JoinHandle<()>>,
}

impl BackendSlot {
    fn clear(&mut self) {
        self.process = None;
        self.readiness = None;
        for drain in self.drains.drain(..) {
            drain.abort();
        }
    }
}

pub struct ProcessSupervisor {
    settings: BackendSettings,
    provisioner: Arc<ArtifactProvisioner>,
    launcher: Arc<dyn Launcher>,
    probe: ReadinessProbe,
    slot: Mutex<BackendSlot>,
    status: watch::Sender<BackendStatus>,
    spawns: AtomicUsize,
}

impl ProcessSupervisor {
    pub fn new(
        settings: BackendSettings,
        policy: ReadinessPolicy,
        provisioner: Arc<ArtifactProvisioner>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            settings,
            provisioner,
            launcher,
            probe: ReadinessProbe::new(reqwest::Client::new(), policy),
            slot: Mutex::new(BackendSlot {
                process: None,
                readiness: None,
                drains: Vec::new(),
            }),
            status: watch::Sender::new(BackendStatus::NotStarted),
            spawns: AtomicUsize::new(0),
        }
    }

    /// Supervisor that downloads over HTTPS and launches the real executable.
    pub fn from_config(config: &RelayConfig) -> GatewayResult<Self> {
        let provisioner = ArtifactProvisioner::from_config(config.artifacts.clone(), &config.backend)?;
        Ok(Self::new(
            config.backend.clone(),
            config.readiness.policy(),
            Arc::new(provisioner),
            Arc::new(CommandLauncher),
        ))
    }

    pub fn provisioner(&self) -> &Arc<ArtifactProvisioner> {
        &self.provisioner
    }

    pub fn base_url(&self) -> String {
        let host = match self.settings.host.as_str() {
            "0.0.0.0" | "" => "127.0.0.1",
            host => host,
        };
        format!("http://{}:{}", host, self.settings.port)
    }

    /// Number of processes launched so far.
    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    /// Current lifecycle status. Never waits for a start in progress.
    ///
    /// A `Ready` backend whose process has exited reports `Stopped`.
    pub async fn status(&self) -> BackendStatus {
        let published = *self.status.borrow();
        if published != BackendStatus::Ready {
            return published;
        }
        let Ok(mut slot) = self.slot.try_lock() else {
            return published;
        };
        match slot.process.as_mut() {
            Some(process) => {
                if process.is_alive() {
                    BackendStatus::Ready
                } else {
                    process.set_status(BackendStatus::Stopped);
                    self.publish(BackendStatus::Stopped);
                    BackendStatus::Stopped
                }
            }
            None => published,
        }
    }

    /// Follow status transitions.
    pub fn subscribe(&self) -> watch::Receiver<BackendStatus> {
        self.status.subscribe()
    }

    fn publish(&self, status: BackendStatus) {
        self.status.send_replace(status);
    }

    /// Return a ready backend, starting one if needed.
    #[instrument(skip(self), fields(port = self.settings.port))]
    pub async fn ensure_ready(&self) -> GatewayResult<BackendEndpoint> {
        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;

        if let Some(process) = slot.process.as_mut() {
            if process.status() == BackendStatus::Ready {
                if process.is_alive() {
                    return Ok(self.endpoint(slot.readiness.unwrap_or(Readiness::Assumed)));
                }
                warn!("backend process exited, restarting");
                process.set_status(BackendStatus::Stopped);
            }
        }
        slot.clear();
        self.publish(BackendStatus::Starting);

        match self.start(slot).await {
            Ok(endpoint) => Ok(endpoint),
            Err(e) => {
                warn!(error = %e, "backend start failed");
                slot.clear();
                self.publish(BackendStatus::Failed);
                Err(e)
            }
        }
    }

    async fn start(&self, slot: &mut BackendSlot) -> GatewayResult<BackendEndpoint> {
        let executable = self.provisioner.ensure(ArtifactKind::Binary).await?;
        let model = self.provisioner.ensure(ArtifactKind::Model).await?;

        let spec = LaunchSpec {
            working_dir: LaunchSpec::executable_dir(&executable),
            executable,
            model,
            host: self.settings.host.clone(),
            port: self.settings.port,
            context_size: self.settings.context_size,
            gpu_layers: self.settings.gpu_layers,
            extra_args: self.settings.extra_args.clone(),
        };
        info!(command = %spec.command_line(), "starting backend");

        let mut process = self.launcher.launch(&spec).await?;
        self.spawns.fetch_add(1, Ordering::SeqCst);
        slot.drains = drain_output(&mut process);

        let port = spec.port;
        let readiness = self
            .probe
            .wait(&self.base_url(), port, || process.try_exit().map(|s| s.to_string()))
            .await
            .map_err(GatewayError::from)?;

        match readiness {
            Readiness::Healthy { attempts } => info!(attempts, "backend ready"),
            Readiness::Assumed => warn!("backend never answered probes, treating as ready"),
        }

        process.set_status(BackendStatus::Ready);
        slot.process = Some(process);
        slot.readiness = Some(readiness);
        self.publish(BackendStatus::Ready);
        Ok(self.endpoint(readiness))
    }

    fn endpoint(&self, readiness: Readiness) -> BackendEndpoint {
        BackendEndpoint {
            base_url: self.base_url(),
            port: self.settings.port,
            readiness,
        }
    }

    /// Terminate the backend, if any.
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(mut process) = slot.process.take() {
            info!(port = process.port(), "stopping backend");
            process.terminate(SHUTDOWN_GRACE).await;
        }
        slot.clear();
        self.publish(BackendStatus::Stopped);
    }
}

fn drain_output(process: &mut BackendProcess) -> Vec<JoinHandle<()>> {
    let port = process.port();
    let mut drains = Vec::with_capacity(2);
    if let Some(stdout) = process.take_stdout() {
        drains.push(pump_lines(stdout, move |line| {
            debug!(target: "relay::backend", port, stream = "stdout", "{line}");
        }));
    }
    if let Some(stderr) = process.take_stderr() {
        drains.push(pump_lines(stderr, move |line| {
            debug!(target: "relay::backend", port, stream = "stderr", "{line}");
        }));
    }
    drains
}
