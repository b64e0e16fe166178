//! Bundle Installation
//!
//! Swaps a downloaded bundle into the installed location and starts the new
//! build. The candidate is first staged next to the installed bundle so the
//! swap itself is two renames on one filesystem; if the second rename fails
//! the first is undone.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::bundle::AppBundle;
use super::error::UpdateError;
use super::process::ExternalCommand;

const LAUNCH_GRACE: Duration = Duration::from_millis(300);
const OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// How the replaced bundle is started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    /// `open -n <bundle>` through Launch Services
    Open,
    /// Spawn the bundle executable directly, optionally through an
    /// interpreter
    Executable { interpreter: Option<PathBuf> },
}

impl Default for Launcher {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            Launcher::Open
        } else {
            Launcher::Executable { interpreter: None }
        }
    }
}

/// Called once the new instance is confirmed running
pub type TerminateHook = Arc<dyn Fn() + Send + Sync>;

pub fn exit_process() -> TerminateHook {
    Arc::new(|| std::process::exit(0))
}

/// Replaces one installed bundle and relaunches it
#[derive(Debug, Clone)]
pub struct Installer {
    installed: PathBuf,
    launcher: Launcher,
}

impl Installer {
    pub fn new(installed: &AppBundle, launcher: Launcher) -> Self {
        Self {
            installed: installed.path().to_path_buf(),
            launcher,
        }
    }

    /// Hidden single backup kept next to the installed bundle
    pub fn backup_path(&self) -> PathBuf {
        self.sibling("backup")
    }

    fn staging_path(&self) -> PathBuf {
        self.sibling("incoming")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let name = self
            .installed
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.installed.with_file_name(format!(".{}.{}", name, suffix))
    }

    /// Replace the installed bundle with `candidate`, then launch it
    pub async fn install(&self, candidate: &AppBundle) -> Result<(), UpdateError> {
        if candidate.existing_executable().is_none() {
            return Err(UpdateError::InvalidDownloadedBundle(
                candidate.path().to_path_buf(),
            ));
        }
        self.replace(candidate)?;
        self.relaunch().await
    }

    /// Swap `candidate` into place, keeping the old bundle as the backup
    pub fn replace(&self, candidate: &AppBundle) -> Result<(), UpdateError> {
        let staged = self.staging_path();
        let backup = self.backup_path();

        remove_if_present(&staged).map_err(replace_failed)?;
        move_tree(candidate.path(), &staged).map_err(replace_failed)?;
        debug!("Staged {} at {}", candidate.path().display(), staged.display());

        remove_if_present(&backup).map_err(replace_failed)?;
        fs::rename(&self.installed, &backup).map_err(replace_failed)?;

        if let Err(e) = fs::rename(&staged, &self.installed) {
            warn!("Swap failed, restoring {}: {}", self.installed.display(), e);
            if let Err(restore) = fs::rename(&backup, &self.installed) {
                warn!("Restore failed: {}", restore);
            }
            return Err(replace_failed(e));
        }

        info!("Installed update at {}", self.installed.display());
        Ok(())
    }

    /// Start the installed bundle and wait until the launch is confirmed
    pub async fn relaunch(&self) -> Result<(), UpdateError> {
        match &self.launcher {
            Launcher::Open => {
                ExternalCommand::new("/usr/bin/open")
                    .arg("-n")
                    .arg(&self.installed)
                    .timeout(OPEN_TIMEOUT)
                    .run()
                    .await
                    .map_err(|e| UpdateError::RelaunchFailed(e.to_string()))?;
            }
            Launcher::Executable { interpreter } => {
                let bundle = AppBundle::load(&self.installed).ok_or_else(|| {
                    UpdateError::RelaunchFailed(format!(
                        "{} is not a bundle",
                        self.installed.display()
                    ))
                })?;
                let executable = bundle.existing_executable().ok_or_else(|| {
                    UpdateError::RelaunchFailed("bundle executable is missing".into())
                })?;
                spawn_detached(interpreter.as_deref(), &executable).await?;
            }
        }
        info!("Relaunched {}", self.installed.display());
        Ok(())
    }
}

async fn spawn_detached(interpreter: Option<&Path>, executable: &Path) -> Result<(), UpdateError> {
    let (program, args): (OsString, Vec<OsString>) = match interpreter {
        Some(interp) => (interp.into(), vec![executable.into()]),
        None => (executable.into(), Vec::new()),
    };

    let mut child = tokio::process::Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| UpdateError::RelaunchFailed(e.to_string()))?;

    tokio::time::sleep(LAUNCH_GRACE).await;
    match child.try_wait() {
        Ok(Some(status)) if !status.success() => Err(UpdateError::RelaunchFailed(format!(
            "new instance exited with {}",
            status
        ))),
        Ok(_) => Ok(()),
        Err(e) => Err(UpdateError::RelaunchFailed(e.to_string())),
    }
}

fn replace_failed(e: io::Error) -> UpdateError {
    UpdateError::ReplaceFailed(e.to_string())
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Rename, falling back to copy + delete across filesystems
fn move_tree(source: &Path, destination: &Path) -> io::Result<()> {
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }
    let bundle = AppBundle::load(source)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "candidate bundle is missing"))?;
    bundle.copy_to(destination)?;
    fs::remove_dir_all(source)
}
