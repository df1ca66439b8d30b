//! Release bundle extraction and installation.
//!
//! Everything in here is blocking file I/O; callers run it on
//! `spawn_blocking`.

use crate::error::ProvisionError;
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    /// Detect the format from a file name or URL.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else {
            None
        }
    }
}

/// Unpack `archive` into `dest`.
pub fn extract(archive: &Path, format: ArchiveFormat, dest: &Path) -> Result<(), ProvisionError> {
    fs::create_dir_all(dest).map_err(|e| ProvisionError::storage(dest, e))?;
    match format {
        ArchiveFormat::TarGz => extract_tar_gz(archive, dest),
        ArchiveFormat::Zip => extract_zip(archive, dest),
    }
}

fn extraction_failure(archive: &Path, message: impl std::fmt::Display) -> ProvisionError {
    ProvisionError::ExtractionFailure {
        archive: archive.to_path_buf(),
        message: message.to_string(),
    }
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<(), ProvisionError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let file = fs::File::open(archive).map_err(|e| ProvisionError::storage(archive, e))?;
    let mut tar = Archive::new(GzDecoder::new(file));
    tar.unpack(dest).map_err(|e| extraction_failure(archive, e))
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<(), ProvisionError> {
    use zip::ZipArchive;

    let file = fs::File::open(archive).map_err(|e| ProvisionError::storage(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| extraction_failure(archive, e))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| extraction_failure(archive, format!("entry {i}: {e}")))?;

        let outpath = match entry.enclosed_name() {
            Some(path) => dest.join(path),
            None => continue,
        };

        if entry.is_dir() {
            fs::create_dir_all(&outpath).map_err(|e| ProvisionError::storage(&outpath, e))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent).map_err(|e| ProvisionError::storage(parent, e))?;
        }
        let mut outfile = fs::File::create(&outpath).map_err(|e| ProvisionError::storage(&outpath, e))?;
        std::io::copy(&mut entry, &mut outfile).map_err(|e| extraction_failure(archive, e))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&outpath, fs::Permissions::from_mode(mode))
                .map_err(|e| ProvisionError::storage(&outpath, e))?;
        }
    }
    Ok(())
}

/// Find the file called `name` under `root`.
///
/// When several copies exist the one with a `bin` directory in its path
/// relative to `root` wins.
pub fn locate_executable(root: &Path, name: &str) -> Result<PathBuf, ProvisionError> {
    let mut matches = Vec::new();
    collect_named(root, name, &mut matches).map_err(|e| ProvisionError::storage(root, e))?;
    matches.sort();

    let in_bin = |p: &PathBuf| {
        p.strip_prefix(root)
            .unwrap_or(p)
            .components()
            .any(|c| matches!(c, Component::Normal(s) if s == "bin"))
    };

    let preferred = matches.iter().find(|p| in_bin(p)).or_else(|| matches.first());
    preferred.cloned().ok_or_else(|| ProvisionError::BinaryNotFound {
        name: name.to_string(),
        root: root.to_path_buf(),
    })
}

fn collect_named(dir: &Path, name: &str, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_named(&path, name, out)?;
        } else if entry.file_name() == name && path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Install `executable` at `target` together with the files beside it.
///
/// Sibling files and directories (shared libraries) are copied first. The
/// executable is written to `<target>.part` and renamed into place last, so
/// `target` only ever exists complete.
pub fn install_executable(executable: &Path, target: &Path) -> Result<(), ProvisionError> {
    let source_dir = executable
        .parent()
        .ok_or_else(|| extraction_failure(executable, "executable has no parent directory"))?;
    let target_dir = target
        .parent()
        .ok_or_else(|| ProvisionError::storage(target, std::io::Error::other("target has no parent directory")))?;
    fs::create_dir_all(target_dir).map_err(|e| ProvisionError::storage(target_dir, e))?;

    for entry in fs::read_dir(source_dir).map_err(|e| ProvisionError::storage(source_dir, e))? {
        let entry = entry.map_err(|e| ProvisionError::storage(source_dir, e))?;
        let path = entry.path();
        if path == executable {
            continue;
        }
        let dest = target_dir.join(entry.file_name());
        if path.is_dir() {
            copy_dir_recursive(&path, &dest).map_err(|e| ProvisionError::storage(&dest, e))?;
        } else {
            fs::copy(&path, &dest).map_err(|e| ProvisionError::storage(&dest, e))?;
        }
    }

    let mut part_name = target.file_name().unwrap_or_default().to_os_string();
    part_name.push(".part");
    let part = target_dir.join(part_name);

    fs::copy(executable, &part).map_err(|e| ProvisionError::storage(&part, e))?;
    make_executable(&part)?;
    fs::rename(&part, target).map_err(|e| {
        let _ = fs::remove_file(&part);
        ProvisionError::storage(target, e)
    })
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), ProvisionError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| ProvisionError::storage(path, e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), ProvisionError> {
    Ok(())
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let dest_path = dest.join(entry.file_name());
        if path.is_dir() {
            copy_dir_recursive(&path, &dest_path)?;
        } else {
            fs::copy(&path, &dest_path)?;
        }
    }
    Ok(())
}
