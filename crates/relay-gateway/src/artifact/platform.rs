//! Host platform detection and release-asset matching.

use super::archive::ArchiveFormat;
use super::source::{Release, ReleaseAsset};

const FALLBACK_TAG: &str = "b8121";
const RELEASE_DOWNLOAD_BASE: &str = "https://github.com/ggml-org/llama.cpp/releases/download";

/// Platform families that llama.cpp publishes prebuilt server bundles for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    UbuntuX64,
    MacosArm64,
    MacosX64,
    WindowsX64,
    Unsupported {
        os: &'static str,
        arch: &'static str,
    },
}

impl Platform {
    pub fn current() -> Self {
        Self::detect(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn detect(os: &'static str, arch: &'static str) -> Self {
        match (os, arch) {
            ("linux", "x86_64") => Platform::UbuntuX64,
            ("macos", "aarch64") => Platform::MacosArm64,
            ("macos", "x86_64") => Platform::MacosX64,
            ("windows", "x86_64") => Platform::WindowsX64,
            (os, arch) => Platform::Unsupported { os, arch },
        }
    }

    /// Short key used in release asset names (e.g. `macos-arm64`).
    pub fn key(&self) -> String {
        match self {
            Platform::UbuntuX64 => "ubuntu-x64".to_string(),
            Platform::MacosArm64 => "macos-arm64".to_string(),
            Platform::MacosX64 => "macos-x64".to_string(),
            Platform::WindowsX64 => "win-x64".to_string(),
            Platform::Unsupported { os, arch } => format!("{os}-{arch}"),
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(
            self,
            Platform::WindowsX64 | Platform::Unsupported { os: "windows", .. }
        )
    }

    pub fn executable_name(&self) -> &'static str {
        if self.is_windows() {
            "llama-server.exe"
        } else {
            "llama-server"
        }
    }

    /// Whether a release asset name is a server bundle for this platform.
    pub fn matches(&self, asset_name: &str) -> bool {
        let name = asset_name.to_lowercase();
        let archive = name.contains("tar.gz") || name.contains("zip");
        match self {
            Platform::UbuntuX64 => {
                (name.contains("ubuntu") || name.contains("linux"))
                    && name.contains("x64")
                    && name.contains("bin")
            }
            Platform::MacosArm64 => name.contains("macos") && name.contains("arm64") && archive,
            Platform::MacosX64 => name.contains("macos") && name.contains("x64") && archive,
            Platform::WindowsX64 => name.contains("win") && name.contains("x64") && name.contains("bin"),
            Platform::Unsupported { .. } => false,
        }
    }

    /// Known-good bundle used when the release lookup fails or nothing matches.
    pub fn fallback_url(&self) -> Option<String> {
        let asset = match self {
            Platform::UbuntuX64 => "bin-ubuntu-x64.tar.gz",
            Platform::MacosArm64 => "bin-macos-arm64.tar.gz",
            Platform::MacosX64 => "bin-macos-x64.tar.gz",
            Platform::WindowsX64 => "bin-win-cpu-x64.zip",
            Platform::Unsupported { .. } => return None,
        };
        Some(format!(
            "{RELEASE_DOWNLOAD_BASE}/{FALLBACK_TAG}/llama-{FALLBACK_TAG}-{asset}"
        ))
    }

    /// Pick the download URL for this platform out of a release listing.
    ///
    /// Falls back to any asset whose name contains the key with the dash
    /// removed (`macosarm64`) before giving up. Only archives we can unpack
    /// are candidates.
    pub fn select_asset(&self, release: &Release) -> Option<String> {
        let squashed = self.key().replace('-', "");
        let archives = || {
            release
                .assets
                .iter()
                .filter(|a| ArchiveFormat::from_name(&a.name).is_some())
        };
        let asset: &ReleaseAsset = archives()
            .find(|a| self.matches(&a.name))
            .or_else(|| archives().find(|a| a.name.to_lowercase().contains(&squashed)))?;

        Some(asset.browser_download_url.clone().unwrap_or_else(|| {
            format!("{RELEASE_DOWNLOAD_BASE}/{}/{}", release.tag_name, asset.name)
        }))
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}
