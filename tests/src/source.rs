//! An in-memory [`ArtifactSource`] serving a server bundle and a model.

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use relay_gateway::artifact::{ArtifactSource, Release, ReleaseAsset};
use relay_gateway::error::ProvisionError;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const BUNDLE_URL: &str = "https://dl.test/llama-b9000-bin-ubuntu-x64.tar.gz";
pub const MODEL_BYTES: &[u8] = b"GGUF\x03\x00\x00\x00fake-model";

/// A gzip tarball laid out like a llama.cpp release: the server under
/// `build/bin/` next to a shared library.
pub fn server_bundle() -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let files: [(&str, &[u8], u32); 3] = [
        ("build/bin/llama-server", b"#!/bin/sh\nexit 0\n", 0o755),
        ("build/bin/libllama.so", b"\x7fELF", 0o644),
        ("build/README.md", b"llama.cpp", 0o644),
    ];
    for (name, data, mode) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        builder.append_data(&mut header, name, data)?;
    }
    builder.into_inner()?.finish()
}

/// Counts lookups and downloads; optionally slow to widen race windows.
pub struct FakeArtifactSource {
    delay: Duration,
    release_lookups: AtomicUsize,
    binary_downloads: AtomicUsize,
    model_downloads: AtomicUsize,
}

impl FakeArtifactSource {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            release_lookups: AtomicUsize::new(0),
            binary_downloads: AtomicUsize::new(0),
            model_downloads: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn release_lookups(&self) -> usize {
        self.release_lookups.load(Ordering::SeqCst)
    }

    pub fn binary_downloads(&self) -> usize {
        self.binary_downloads.load(Ordering::SeqCst)
    }

    pub fn model_downloads(&self) -> usize {
        self.model_downloads.load(Ordering::SeqCst)
    }
}

impl Default for FakeArtifactSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactSource for FakeArtifactSource {
    async fn latest_release(&self, _api_url: &str) -> Result<Release, ProvisionError> {
        self.release_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(Release {
            tag_name: "b9000".to_string(),
            assets: vec![
                ReleaseAsset {
                    name: "llama-b9000-bin-macos-arm64.zip".to_string(),
                    browser_download_url: Some("https://dl.test/llama-b9000-bin-macos-arm64.zip".to_string()),
                },
                ReleaseAsset {
                    name: "llama-b9000-bin-ubuntu-x64.tar.gz".to_string(),
                    browser_download_url: Some(BUNDLE_URL.to_string()),
                },
            ],
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, ProvisionError> {
        tokio::time::sleep(self.delay).await;
        let bytes = if url == BUNDLE_URL {
            self.binary_downloads.fetch_add(1, Ordering::SeqCst);
            server_bundle().map_err(|e| ProvisionError::NetworkFailure {
                url: url.to_string(),
                message: e.to_string(),
            })?
        } else if url.ends_with(".gguf") {
            self.model_downloads.fetch_add(1, Ordering::SeqCst);
            MODEL_BYTES.to_vec()
        } else {
            return Err(ProvisionError::NetworkFailure {
                url: url.to_string(),
                message: "404 Not Found".to_string(),
            });
        };

        tokio::fs::write(dest, &bytes).await.map_err(|source| ProvisionError::Storage {
            path: dest.to_path_buf(),
            source,
        })?;
        Ok(bytes.len() as u64)
    }
}
