//! Update Orchestrator
//!
//! Drives one update cycle end to end:
//!
//! 1. Resolve the installed bundle and its version
//! 2. List releases and select a candidate
//! 3. Download the asset into a work directory next to the installed bundle
//! 4. Extract it and locate the new bundle
//! 5. Compare signing identities
//!
//! Each step publishes a state transition. Installing or deferring the
//! result is a separate call.

use semver::Version;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::bundle::AppBundle;
use super::deferred::{DeferredUpdate, PendingUpdates};
use super::error::UpdateError;
use super::extract::ArchiveExtractor;
use super::install::{exit_process, Installer, Launcher, TerminateHook};
use super::provider::ReleaseProvider;
use super::release::{Asset, Release};
use super::selector::select_update;
use super::signing::{AuthenticityValidator, SigningInspector};
use super::state::{DownloadedBundle, LastError, StatePublisher, UpdateState};
use crate::engine::config::UpdaterConfig;

const DOWNLOAD_FILE: &str = "download";

/// Result of a successful check
#[derive(Debug, Clone)]
pub struct DownloadedUpdate {
    pub release: Release,
    pub asset: Asset,
    pub bundle: DownloadedBundle,
}

/// Self-updater for the running application bundle
pub struct AppUpdater<P: ReleaseProvider> {
    config: UpdaterConfig,
    provider: P,
    installed: Option<AppBundle>,
    extractor: ArchiveExtractor,
    inspector: SigningInspector,
    launcher: Launcher,
    terminate: TerminateHook,
    publisher: StatePublisher,
    check_lock: tokio::sync::Mutex<()>,
}

impl<P: ReleaseProvider> AppUpdater<P> {
    pub fn new(config: UpdaterConfig, provider: P) -> Self {
        Self {
            config,
            provider,
            installed: AppBundle::main(),
            extractor: ArchiveExtractor::default(),
            inspector: SigningInspector::default(),
            launcher: Launcher::default(),
            terminate: exit_process(),
            publisher: StatePublisher::new(),
            check_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Update this bundle instead of the one the process runs from
    pub fn with_installed_bundle(mut self, bundle: AppBundle) -> Self {
        self.installed = Some(bundle);
        self
    }

    pub fn with_extractor(mut self, extractor: ArchiveExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_signing_inspector(mut self, inspector: SigningInspector) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = launcher;
        self
    }

    /// Replace the default `exit(0)` run after a successful relaunch
    pub fn with_terminate_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.terminate = Arc::new(hook);
        self
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn installed_bundle(&self) -> Option<&AppBundle> {
        self.installed.as_ref()
    }

    pub fn state(&self) -> UpdateState {
        self.publisher.state()
    }

    /// Releases from the most recent successful listing
    pub fn releases(&self) -> Vec<Release> {
        self.publisher.releases()
    }

    /// Receive every release list fetched from now on
    pub fn subscribe_releases(&self) -> mpsc::UnboundedReceiver<Vec<Release>> {
        self.publisher.subscribe_releases()
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.publisher.last_error()
    }

    /// Receive every state transition from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<UpdateState> {
        self.publisher.subscribe()
    }

    /// Run one update check.
    ///
    /// Concurrent calls are serialized. Dropping the returned future cancels
    /// the check, including any running download or subprocess.
    pub async fn check_once(&self) -> Result<DownloadedUpdate, UpdateError> {
        let _guard = self.check_lock.lock().await;
        info!("Checking for updates from {}", self.config.repository);

        match self.run_check().await {
            Ok(update) => Ok(update),
            Err(e) => {
                if e.is_benign() {
                    debug!("{}", e);
                } else if e.is_cancelled() {
                    debug!("Update check cancelled");
                } else {
                    warn!("Update check failed: {}", e);
                }
                self.publisher.record_error(&e);
                Err(e)
            }
        }
    }

    async fn run_check(&self) -> Result<DownloadedUpdate, UpdateError> {
        let installed = self.installed.as_ref().ok_or(UpdateError::BundleExecutable)?;
        if installed.existing_executable().is_none() {
            return Err(UpdateError::BundleExecutable);
        }
        let installed_version = installed.version().ok_or(UpdateError::BundleExecutable)?;
        let (owner, repo) = self.config.owner_repo()?;

        let releases = self.provider.fetch_releases(owner, repo).await?;
        self.publisher.set_releases(releases.clone());

        let (release, asset) = self
            .select(&releases, &installed_version)
            .ok_or(UpdateError::NoValidUpdate)?;
        info!("Found update {} ({})", release.tag, asset.name);
        self.publisher.publish(UpdateState::NewVersionDetected {
            release: release.clone(),
            asset: asset.clone(),
        });

        let bundle = self.download_and_verify(installed, &release, &asset).await?;
        self.publisher.publish(UpdateState::Downloaded {
            release: release.clone(),
            asset: asset.clone(),
            bundle: bundle.clone(),
        });
        info!("Update {} ready at {}", release.tag, bundle.path().display());

        Ok(DownloadedUpdate {
            release,
            asset,
            bundle,
        })
    }

    fn select(&self, releases: &[Release], installed: &Version) -> Option<(Release, Asset)> {
        select_update(
            releases,
            installed,
            &self.config.asset_prefix(),
            self.config.allow_prereleases,
        )
    }

    async fn download_and_verify(
        &self,
        installed: &AppBundle,
        release: &Release,
        asset: &Asset,
    ) -> Result<DownloadedBundle, UpdateError> {
        let workspace = work_directory(installed.path())?;
        let destination = workspace.path().join(DOWNLOAD_FILE);

        let stream = self.provider.download(asset, &destination).await?;
        let archive = stream
            .wait_for_location(|fraction| {
                debug!("Download progress {:.0}%", fraction * 100.0);
                self.publisher.publish(UpdateState::Downloading {
                    release: release.clone(),
                    asset: asset.clone(),
                    fraction,
                });
            })
            .await?;

        let extracted = self
            .extractor
            .extract(&archive, asset.media_kind)
            .await?
            .ok_or_else(|| UpdateError::UnzipFailed("archive holds no application bundle".into()))?;
        let bundle = AppBundle::load(&extracted)
            .ok_or_else(|| UpdateError::InvalidDownloadedBundle(extracted.clone()))?;

        let validator =
            AuthenticityValidator::new(self.inspector.clone(), self.config.skip_signing_validation);
        if !validator.is_authentic(installed, &bundle).await {
            return Err(UpdateError::CodeSigningIdentity);
        }

        Ok(DownloadedBundle::new(bundle, Some(workspace)))
    }

    /// Replace the installed bundle, relaunch it and terminate this process.
    ///
    /// The cycle's work directory is deleted before the terminate hook runs,
    /// since the default hook exits without running destructors.
    pub async fn install(&self, update: &DownloadedBundle) -> Result<(), UpdateError> {
        self.install_bundle(update.bundle()).await?;
        if let Err(e) = update.remove_workspace() {
            warn!("Cannot remove work directory: {}", e);
        }
        self.publisher.publish(UpdateState::None);
        (self.terminate)();
        Ok(())
    }

    async fn install_bundle(&self, candidate: &AppBundle) -> Result<(), UpdateError> {
        let installed = self.installed.as_ref().ok_or(UpdateError::BundleExecutable)?;
        Installer::new(installed, self.launcher.clone())
            .install(candidate)
            .await
            .inspect_err(|e| warn!("Install failed: {}", e))
    }

    /// Park a downloaded update for a later run
    pub fn defer(
        &self,
        update: &DownloadedUpdate,
        store: &PendingUpdates,
    ) -> Result<DeferredUpdate, UpdateError> {
        store.park(update.bundle.bundle(), &update.release, &update.asset)
    }

    /// Pending store for the installed application
    pub fn pending_updates(&self) -> Result<PendingUpdates, UpdateError> {
        PendingUpdates::for_identifier(self.installed.as_ref().and_then(|b| b.identifier()))
    }

    /// Install a parked update. The store is cleared before terminating.
    pub async fn install_deferred(&self, store: &PendingUpdates) -> Result<(), UpdateError> {
        let record = store.load()?.ok_or(UpdateError::NoValidUpdate)?;
        let bundle = record
            .load_bundle()
            .ok_or_else(|| UpdateError::InvalidDownloadedBundle(record.bundle_path.clone()))?;

        info!("Installing deferred update {}", record.release_version);
        self.install_bundle(&bundle).await?;
        store.cleanup()?;
        (self.terminate)();
        Ok(())
    }
}

impl<P: ReleaseProvider + 'static> AppUpdater<P> {
    /// Run `check_once` on the runtime. Aborting the handle cancels it.
    pub fn spawn_check(self: &Arc<Self>) -> JoinHandle<Result<DownloadedUpdate, UpdateError>> {
        let updater = Arc::clone(self);
        tokio::spawn(async move { updater.check_once().await })
    }
}

/// Fresh work directory beside the installed bundle, so the final move
/// stays on one filesystem
fn work_directory(installed: &Path) -> Result<TempDir, UpdateError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".appupdater-");
    if let Some(parent) = installed.parent() {
        match builder.tempdir_in(parent) {
            Ok(dir) => return Ok(dir),
            Err(e) => debug!("Cannot create work directory in {}: {}", parent.display(), e),
        }
    }
    Ok(builder.tempdir()?)
}
