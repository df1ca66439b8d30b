//! Relay testing utilities
//!
//! Stand-ins for the outside world so the supervisor, proxy and server can
//! be exercised without downloading llama.cpp or loading a model:
//!
//! - [`MockBackend`]: answers `/health`, `/slots`, `/completion` and
//!   `/v1/chat/completions` (plain or SSE)
//! - [`MockLauncher`]: counts launches and starts the mock instead of a real server
//! - [`FakeArtifactSource`]: serves a release listing, a server tarball and a model
//! - [`Harness`]: all of the above wired into a [`ProcessSupervisor`]

pub mod backend;
pub mod source;

pub use backend::{MockBackend, ReceivedRequest, STREAM_DELTAS, sse_body};
pub use launcher::MockLauncher;
pub use source::FakeArtifactSource;

use anyhow::Result;
use relay_gateway::RelayConfig;
use relay_gateway::artifact::{ArtifactProvisioner, Platform};
use relay_gateway::backend::{ProcessSupervisor, ReadinessPolicy};
use relay_gateway::proxy::ForwardingProxy;
use relay_gateway::server::RelayServer;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Readiness policy fast enough for tests.
pub fn fast_policy() -> ReadinessPolicy {
    ReadinessPolicy {
        interval: Duration::from_millis(20),
        max_attempts: 10,
        probe_timeout: Duration::from_millis(250),
        grace: Duration::from_millis(50),
    }
}

/// A port nothing listens on.
pub fn closed_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

pub struct HarnessBuilder {
    policy: ReadinessPolicy,
    launch_delay: Duration,
    download_delay: Duration,
    backend_answers: bool,
    backend_port: Option<u16>,
    request_timeout: Duration,
}

impl HarnessBuilder {
    pub fn policy(mut self, policy: ReadinessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    pub fn download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }

    /// Point the supervisor at a closed port so the launched backend never answers.
    pub fn unreachable_backend(mut self) -> Self {
        self.backend_answers = false;
        self
    }

    /// Point the supervisor at a backend served outside the harness.
    pub fn backend_port(mut self, port: u16) -> Self {
        self.backend_port = Some(port);
        self.backend_answers = false;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Harness> {
        let work_dir = tempfile::tempdir()?;
        let backend = MockBackend::bind()?;
        let port = match self.backend_port {
            Some(port) => port,
            None if self.backend_answers => backend.port(),
            None => closed_port()?,
        };

        let mut config = RelayConfig::default();
        config.server.service_name = "relay-test".to_string();
        config.artifacts.work_dir = work_dir.path().to_path_buf();
        config.backend.port = port;
        config.proxy.request_timeout_secs = self.request_timeout.as_secs().max(1);

        let mut launcher = MockLauncher::new().with_delay(self.launch_delay);
        if self.backend_answers {
            launcher = launcher.with_backend(backend.clone());
        }
        let launcher = Arc::new(launcher);
        let source = Arc::new(FakeArtifactSource::new().with_delay(self.download_delay));

        let provisioner = ArtifactProvisioner::with_platform(
            config.artifacts.clone(),
            &config.backend,
            source.clone(),
            Platform::UbuntuX64,
        );
        let supervisor = Arc::new(ProcessSupervisor::new(
            config.backend.clone(),
            self.policy,
            Arc::new(provisioner),
            launcher.clone(),
        ));

        Ok(Harness {
            work_dir,
            backend,
            launcher,
            source,
            supervisor,
            config,
            request_timeout: self.request_timeout,
        })
    }
}

/// A supervisor wired to mocks, with its scratch work directory.
pub struct Harness {
    pub work_dir: TempDir,
    pub backend: Arc<MockBackend>,
    pub launcher: Arc<MockLauncher>,
    pub source: Arc<FakeArtifactSource>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub config: RelayConfig,
    request_timeout: Duration,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            policy: fast_policy(),
            launch_delay: Duration::ZERO,
            download_delay: Duration::ZERO,
            backend_answers: true,
            backend_port: None,
            request_timeout: Duration::from_secs(5),
        }
    }

    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn proxy(&self) -> ForwardingProxy {
        ForwardingProxy::new(self.supervisor.clone(), self.request_timeout)
    }

    pub fn server(&self) -> RelayServer {
        RelayServer::new(self.config.clone(), self.supervisor.clone())
    }
}

/// Assert how many backend processes a [`MockLauncher`] has started.
#[macro_export]
macro_rules! assert_launched {
    ($launcher:expr, $expected:expr) => {
        let count = $launcher.launches();
        assert_eq!(
            count, $expected,
            "expected {} backend launch(es), but {} happened",
            $expected, count
        );
    };
}
