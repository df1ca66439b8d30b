//! Artifact provisioning
//!
//! Makes sure the llama-server executable and the GGUF model exist on local
//! disk, fetching them on first use. Each kind sits behind its own async
//! mutex: concurrent callers for a missing artifact wait for a single
//! download and then see the same path.
//!
//! Nothing is ever written directly to a final path. Binaries are staged in
//! a scratch directory under the work dir and renamed into place; models are
//! streamed to `<path>.part` first.

mod archive;
pub mod platform;
pub mod source;

pub use archive::{ArchiveFormat, extract, install_executable, locate_executable};
pub use platform::Platform;
pub use source::{ArtifactSource, HttpArtifactSource, Release, ReleaseAsset};

use crate::config::{ArtifactSettings, BackendSettings};
use crate::error::ProvisionError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Binary,
    Model,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Binary => f.write_str("binary"),
            ArtifactKind::Model => f.write_str("model"),
        }
    }
}

/// A file the backend needs, and whether it is known to be on disk.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub local_path: PathBuf,
    /// URL it was fetched from, once known.
    pub remote_source: Option<String>,
    pub present: bool,
}

impl Artifact {
    fn new(kind: ArtifactKind, local_path: PathBuf) -> Self {
        Self {
            kind,
            local_path,
            remote_source: None,
            present: false,
        }
    }
}

pub struct ArtifactProvisioner {
    settings: ArtifactSettings,
    platform: Platform,
    source: Arc<dyn ArtifactSource>,
    binary: Mutex<Artifact>,
    model: Mutex<Artifact>,
}

impl ArtifactProvisioner {
    pub fn new(
        settings: ArtifactSettings,
        backend: &BackendSettings,
        source: Arc<dyn ArtifactSource>,
    ) -> Self {
        Self::with_platform(settings, backend, source, Platform::current())
    }

    pub fn with_platform(
        settings: ArtifactSettings,
        backend: &BackendSettings,
        source: Arc<dyn ArtifactSource>,
        platform: Platform,
    ) -> Self {
        let binary_path = backend.server_path.clone().unwrap_or_else(|| {
            settings.work_dir.join("bin").join(platform.executable_name())
        });
        let model_path = backend
            .model_path
            .clone()
            .unwrap_or_else(|| settings.work_dir.join("models").join(&settings.model_file));

        Self {
            binary: Mutex::new(Artifact::new(ArtifactKind::Binary, binary_path)),
            model: Mutex::new(Artifact::new(ArtifactKind::Model, model_path)),
            settings,
            platform,
            source,
        }
    }

    /// Provisioner backed by [`HttpArtifactSource`].
    pub fn from_config(
        settings: ArtifactSettings,
        backend: &BackendSettings,
    ) -> Result<Self, ProvisionError> {
        let source = Arc::new(HttpArtifactSource::new()?);
        Ok(Self::new(settings, backend, source))
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    fn slot(&self, kind: ArtifactKind) -> &Mutex<Artifact> {
        match kind {
            ArtifactKind::Binary => &self.binary,
            ArtifactKind::Model => &self.model,
        }
    }

    /// Snapshot of the current artifact record.
    pub async fn artifact(&self, kind: ArtifactKind) -> Artifact {
        self.slot(kind).lock().await.clone()
    }

    /// Return a local path for `kind`, fetching it if it is not on disk.
    #[instrument(skip(self))]
    pub async fn ensure(&self, kind: ArtifactKind) -> Result<PathBuf, ProvisionError> {
        let mut artifact = self.slot(kind).lock().await;
        if artifact.present || is_regular_file(&artifact.local_path).await {
            artifact.present = true;
            return Ok(artifact.local_path.clone());
        }

        let target = artifact.local_path.clone();
        info!(%kind, path = %target.display(), "artifact missing, provisioning");
        let url = match kind {
            ArtifactKind::Binary => self.provision_binary(&target).await?,
            ArtifactKind::Model => self.provision_model(&target).await?,
        };

        artifact.remote_source = Some(url);
        artifact.present = true;
        info!(%kind, path = %target.display(), "artifact ready");
        Ok(target)
    }

    async fn binary_url(&self) -> Result<String, ProvisionError> {
        match self.source.latest_release(&self.settings.release_api_url).await {
            Ok(release) => {
                if let Some(url) = self.platform.select_asset(&release) {
                    return Ok(url);
                }
                warn!(platform = %self.platform, tag = %release.tag_name, "no matching release asset");
            }
            Err(e) => warn!(error = %e, "release lookup failed"),
        }

        self.platform
            .fallback_url()
            .ok_or_else(|| ProvisionError::NoMatchingAsset(self.platform.key()))
    }

    async fn provision_binary(&self, target: &Path) -> Result<String, ProvisionError> {
        let url = self.binary_url().await?;
        let format = ArchiveFormat::from_name(&url).ok_or_else(|| ProvisionError::ExtractionFailure {
            archive: PathBuf::from(&url),
            message: "unsupported archive format".to_string(),
        })?;

        let work_dir = &self.settings.work_dir;
        tokio::fs::create_dir_all(work_dir)
            .await
            .map_err(|e| ProvisionError::storage(work_dir, e))?;
        let staging = tempfile::Builder::new()
            .prefix(".relay-staging-")
            .tempdir_in(work_dir)
            .map_err(|e| ProvisionError::storage(work_dir, e))?;

        let archive_name = match format {
            ArchiveFormat::TarGz => "bundle.tar.gz",
            ArchiveFormat::Zip => "bundle.zip",
        };
        let archive_path = staging.path().join(archive_name);
        info!(%url, "downloading server bundle");
        self.source.download(&url, &archive_path).await?;

        let extract_dir = staging.path().join("extract");
        let exe_name = self.platform.executable_name();
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || {
            extract(&archive_path, format, &extract_dir)?;
            let found = locate_executable(&extract_dir, exe_name)?;
            install_executable(&found, &target)
        })
        .await
        .map_err(|e| ProvisionError::ExtractionFailure {
            archive: staging.path().to_path_buf(),
            message: e.to_string(),
        })??;

        Ok(url)
    }

    async fn provision_model(&self, target: &Path) -> Result<String, ProvisionError> {
        let url = self.settings.model_url();
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProvisionError::storage(parent, e))?;
        }

        let mut part_name = target.file_name().unwrap_or_default().to_os_string();
        part_name.push(".part");
        let part = target.with_file_name(part_name);

        info!(%url, "downloading model");
        let result = match self.source.download(&url, &part).await {
            Ok(_) => tokio::fs::rename(&part, target)
                .await
                .map_err(|e| ProvisionError::storage(target, e)),
            Err(e) => Err(e),
        };
        if result.is_err() {
            let _ = tokio::fs::remove_file(&part).await;
        }
        result.map(|_| url)
    }
}

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
