//! Update State Machine
//!
//! Observable lifecycle of an update check. Every transition is delivered to
//! every subscriber, in order, with no coalescing.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

use super::bundle::AppBundle;
use super::error::{ErrorKind, UpdateError};
use super::release::{Asset, Release};

/// An extracted, validated bundle awaiting installation.
///
/// Holds the work directory it was extracted into; the directory is removed
/// once the last clone is dropped.
#[derive(Debug, Clone)]
pub struct DownloadedBundle {
    bundle: AppBundle,
    workspace: Option<Arc<TempDir>>,
}

impl DownloadedBundle {
    pub fn new(bundle: AppBundle, workspace: Option<TempDir>) -> Self {
        Self {
            bundle,
            workspace: workspace.map(Arc::new),
        }
    }

    pub fn bundle(&self) -> &AppBundle {
        &self.bundle
    }

    pub fn path(&self) -> &Path {
        self.bundle.path()
    }

    pub fn workspace_path(&self) -> Option<&Path> {
        self.workspace.as_deref().map(TempDir::path)
    }

    /// Delete the work directory now, even while other clones are alive
    pub fn remove_workspace(&self) -> std::io::Result<()> {
        match self.workspace_path() {
            Some(dir) if dir.exists() => std::fs::remove_dir_all(dir),
            _ => Ok(()),
        }
    }
}

impl PartialEq for DownloadedBundle {
    fn eq(&self, other: &Self) -> bool {
        self.bundle == other.bundle
    }
}

impl Serialize for DownloadedBundle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.path().display())
    }
}

/// Current status of the update process
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateState {
    /// No update in progress
    #[default]
    None,
    /// An eligible release was selected
    NewVersionDetected { release: Release, asset: Asset },
    /// Asset transfer in progress
    Downloading {
        release: Release,
        asset: Asset,
        fraction: f64,
    },
    /// Extracted and validated, ready to install
    Downloaded {
        release: Release,
        asset: Asset,
        bundle: DownloadedBundle,
    },
}

impl UpdateState {
    pub fn release(&self) -> Option<&Release> {
        match self {
            Self::None => None,
            Self::NewVersionDetected { release, .. }
            | Self::Downloading { release, .. }
            | Self::Downloaded { release, .. } => Some(release),
        }
    }

    pub fn asset(&self) -> Option<&Asset> {
        match self {
            Self::None => None,
            Self::NewVersionDetected { asset, .. }
            | Self::Downloading { asset, .. }
            | Self::Downloaded { asset, .. } => Some(asset),
        }
    }

    pub fn fraction(&self) -> Option<f64> {
        match self {
            Self::Downloading { fraction, .. } => Some(*fraction),
            _ => None,
        }
    }

    pub fn is_downloaded(&self) -> bool {
        matches!(self, Self::Downloaded { .. })
    }

    /// Short name of the state
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::NewVersionDetected { .. } => "new_version_detected",
            Self::Downloading { .. } => "downloading",
            Self::Downloaded { .. } => "downloaded",
        }
    }
}

/// Most recent failed check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl LastError {
    pub fn from_error(error: &UpdateError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            at: Utc::now(),
        }
    }
}

#[derive(Default)]
struct Shared {
    state: UpdateState,
    releases: Vec<Release>,
    last_error: Option<LastError>,
    subscribers: Vec<mpsc::UnboundedSender<UpdateState>>,
    release_subscribers: Vec<mpsc::UnboundedSender<Vec<Release>>>,
}

/// Holds the observable snapshot and fans transitions out to subscribers
#[derive(Default)]
pub struct StatePublisher {
    shared: Mutex<Shared>,
}

impl StatePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every transition published from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<UpdateState> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.lock().subscribers.push(tx);
        rx
    }

    /// Replace the current state and notify subscribers
    pub fn publish(&self, state: UpdateState) {
        let mut shared = self.shared.lock();
        shared.subscribers.retain(|tx| tx.send(state.clone()).is_ok());
        shared.state = state;
    }

    pub fn state(&self) -> UpdateState {
        self.shared.lock().state.clone()
    }

    /// Receive every release list stored from now on
    pub fn subscribe_releases(&self) -> mpsc::UnboundedReceiver<Vec<Release>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.lock().release_subscribers.push(tx);
        rx
    }

    /// Replace the release list and notify release subscribers
    pub fn set_releases(&self, releases: Vec<Release>) {
        let mut shared = self.shared.lock();
        shared
            .release_subscribers
            .retain(|tx| tx.send(releases.clone()).is_ok());
        shared.releases = releases;
    }

    pub fn releases(&self) -> Vec<Release> {
        self.shared.lock().releases.clone()
    }

    pub fn record_error(&self, error: &UpdateError) {
        self.shared.lock().last_error = Some(LastError::from_error(error));
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.shared.lock().last_error.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().subscribers.len()
    }
}
