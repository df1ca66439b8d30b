//! Remote artifact sources.

use crate::error::ProvisionError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

const RELEASE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Subset of the GitHub release payload the provisioner needs.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(default)]
    pub browser_download_url: Option<String>,
}

/// Where release metadata and artifact bytes come from.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Fetch the latest release listing from `api_url`.
    async fn latest_release(&self, api_url: &str) -> Result<Release, ProvisionError>;

    /// Stream `url` into `dest`, returning the number of bytes written.
    ///
    /// `dest` is a scratch path owned by the caller; it may hold a partial
    /// file when this returns an error.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, ProvisionError>;
}

/// [`ArtifactSource`] over HTTPS.
pub struct HttpArtifactSource {
    client: Client,
}

impl HttpArtifactSource {
    pub fn new() -> Result<Self, ProvisionError> {
        let client = Client::builder()
            .user_agent(concat!("relay-gateway/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ProvisionError::network("http client", e))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    #[instrument(skip(self))]
    async fn latest_release(&self, api_url: &str) -> Result<Release, ProvisionError> {
        let response = self
            .client
            .get(api_url)
            .header("Accept", "application/vnd.github.v3+json")
            .timeout(RELEASE_LOOKUP_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProvisionError::network(api_url, e))?;

        response
            .json::<Release>()
            .await
            .map_err(|e| ProvisionError::network(api_url, e))
    }

    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, ProvisionError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/octet-stream")
            .send()
            .await
            .map_err(|e| ProvisionError::network(url, e))?;

        if !response.status().is_success() {
            return Err(ProvisionError::network(
                url,
                format!("download failed with status: {}", response.status()),
            ));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| ProvisionError::storage(dest, e))?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ProvisionError::network(url, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ProvisionError::storage(dest, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| ProvisionError::storage(dest, e))?;

        debug!(bytes = written, "download complete");
        Ok(written)
    }
}
