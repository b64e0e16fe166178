//! Archive Extraction
//!
//! Archives are unpacked in place by the system `unzip` and `tar` tools. The
//! result is checked for entries that resolve outside the extraction
//! directory before anything else looks at it, and is discarded on failure.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::bundle::BUNDLE_EXTENSION;
use super::error::UpdateError;
use super::process::ExternalCommand;
use super::release::MediaKind;

pub const EXTRACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Unpacks downloaded archives with external tools
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    unzip: PathBuf,
    tar: PathBuf,
    timeout: Duration,
}

impl Default for ArchiveExtractor {
    fn default() -> Self {
        Self {
            unzip: locate_tool("unzip"),
            tar: locate_tool("tar"),
            timeout: EXTRACTION_TIMEOUT,
        }
    }
}

fn locate_tool(name: &str) -> PathBuf {
    let fixed = Path::new("/usr/bin").join(name);
    if fixed.exists() {
        fixed
    } else {
        which::which(name).unwrap_or(fixed)
    }
}

impl ArchiveExtractor {
    pub fn with_tools(unzip: impl Into<PathBuf>, tar: impl Into<PathBuf>) -> Self {
        Self {
            unzip: unzip.into(),
            tar: tar.into(),
            timeout: EXTRACTION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extract `archive` into its own directory and return the first
    /// application bundle found there, if any.
    pub async fn extract(&self, archive: &Path, kind: MediaKind) -> Result<Option<PathBuf>, UpdateError> {
        let dir = archive
            .parent()
            .ok_or_else(|| UpdateError::UnzipFailed("archive has no parent directory".into()))?;

        let command = match kind {
            MediaKind::Zip => ExternalCommand::new(&self.unzip).arg("-q").arg(archive),
            MediaKind::Tar => ExternalCommand::new(&self.tar).arg("xf").arg(archive),
            MediaKind::Unknown => {
                return Err(UpdateError::UnzipFailed(format!(
                    "unsupported archive type: {}",
                    archive.display()
                )))
            }
        };

        debug!("Extracting {} into {}", archive.display(), dir.display());
        if let Err(e) = command.current_dir(dir).timeout(self.timeout).run().await {
            discard_extracted(dir, archive);
            return Err(e.into());
        }

        if let Err(e) = validate_extracted_contents(dir) {
            discard_extracted(dir, archive);
            return Err(e);
        }

        find_app_bundle(dir)
    }
}

/// Reject any entry under `dir` that resolves outside of it, following
/// symlinks and resolving dangling ones lexically.
pub fn validate_extracted_contents(dir: &Path) -> Result<(), UpdateError> {
    let base = dir.canonicalize()?;

    for entry in WalkDir::new(&base).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| UpdateError::UnzipFailed(e.to_string()))?;
        let resolved = resolve_entry(entry.path())?;
        if !resolved.starts_with(&base) {
            warn!(
                "Rejecting archive entry {} -> {}",
                entry.path().display(),
                resolved.display()
            );
            return Err(UpdateError::PathTraversalDetected(entry.path().to_path_buf()));
        }
    }
    Ok(())
}

fn resolve_entry(path: &Path) -> Result<PathBuf, UpdateError> {
    if let Ok(resolved) = path.canonicalize() {
        return Ok(resolved);
    }

    // Dangling symlink
    let target = fs::read_link(path)?;
    let joined = if target.is_absolute() {
        target
    } else {
        path.parent().unwrap_or(Path::new("/")).join(target)
    };
    Ok(normalize_lexically(&joined))
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// First real `.app` directory directly under `dir`, by name order
pub fn find_app_bundle(dir: &Path) -> Result<Option<PathBuf>, UpdateError> {
    let mut entries = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect::<Vec<_>>();
    entries.sort();

    Ok(entries.into_iter().find(|path| {
        path.extension().is_some_and(|e| e == BUNDLE_EXTENSION)
            && fs::symlink_metadata(path).is_ok_and(|m| m.is_dir())
    }))
}

/// Remove everything under `dir` except the archive itself
fn discard_extracted(dir: &Path, archive: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path == archive {
            continue;
        }
        let removed = match entry.file_type() {
            Ok(t) if t.is_dir() => fs::remove_dir_all(&path),
            _ => fs::remove_file(&path),
        };
        if let Err(e) = removed {
            warn!("Failed to discard {}: {}", path.display(), e);
        }
    }
}
