//! Readiness polling.

use crate::error::BackendStartError;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Endpoints tried each round; the first 2xx wins.
pub const PROBE_PATHS: [&str; 2] = ["/health", "/slots"];

/// How long to wait for a starting backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Delay between rounds.
    pub interval: Duration,
    pub max_attempts: u32,
    /// Timeout of a single probe request.
    pub probe_timeout: Duration,
    /// Extra wait after the last failed round before assuming readiness.
    pub grace: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_attempts: 90,
            probe_timeout: Duration::from_secs(2),
            grace: Duration::from_secs(5),
        }
    }
}

/// How a backend came to be considered ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// A probe answered 2xx on the given round.
    Healthy { attempts: u32 },
    /// The probe budget ran out; readiness was assumed after the grace delay.
    Assumed,
}

pub struct ReadinessProbe {
    client: Client,
    policy: ReadinessPolicy,
}

impl ReadinessProbe {
    pub fn new(client: Client, policy: ReadinessPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &ReadinessPolicy {
        &self.policy
    }

    /// One probe round against `base_url`.
    pub async fn check(&self, base_url: &str) -> bool {
        for path in PROBE_PATHS {
            let url = format!("{base_url}{path}");
            match self
                .client
                .get(&url)
                .timeout(self.policy.probe_timeout)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return true,
                Ok(resp) => debug!(%url, status = %resp.status(), "probe not ready"),
                Err(e) => debug!(%url, error = %e, "probe failed"),
            }
        }
        false
    }

    /// Poll until a probe succeeds or the budget runs out.
    ///
    /// `exited` is consulted before every round and after the grace delay;
    /// when it reports an exit status the wait fails with
    /// [`BackendStartError::Exited`].
    pub async fn wait<F>(&self, base_url: &str, port: u16, mut exited: F) -> Result<Readiness, BackendStartError>
    where
        F: FnMut() -> Option<String>,
    {
        for attempt in 1..=self.policy.max_attempts {
            if let Some(status) = exited() {
                return Err(BackendStartError::Exited { port, status });
            }
            if self.check(base_url).await {
                debug!(port, attempt, "backend answered readiness probe");
                return Ok(Readiness::Healthy { attempts: attempt });
            }
            tokio::time::sleep(self.policy.interval).await;
        }

        warn!(
            port,
            attempts = self.policy.max_attempts,
            grace_ms = self.policy.grace.as_millis() as u64,
            "readiness budget exhausted, assuming ready after grace delay"
        );
        tokio::time::sleep(self.policy.grace).await;
        if let Some(status) = exited() {
            return Err(BackendStartError::Exited { port, status });
        }
        Ok(Readiness::Assumed)
    }
}
