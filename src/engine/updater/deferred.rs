//! Deferred Updates
//!
//! A downloaded update can be parked for a later run. The bundle is copied
//! into a per-application directory under the user data dir together with a
//! small JSON record describing it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::bundle::AppBundle;
use super::error::UpdateError;
use super::release::{Asset, Release};

const PENDING_DIR: &str = "PendingUpdates";
const PENDING_BUNDLE: &str = "Update.app";
const RECORD_FILE: &str = "pending.json";
const FALLBACK_IDENTIFIER: &str = "AppUpdater";

/// A parked update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredUpdate {
    pub bundle_path: PathBuf,
    pub release_version: String,
    pub release_name: String,
    pub asset_name: String,
    pub download_date: DateTime<Utc>,
}

impl DeferredUpdate {
    pub fn new(bundle_path: PathBuf, release: &Release, asset: &Asset) -> Self {
        Self {
            bundle_path,
            release_version: release.tag.to_string(),
            release_name: release.display_name.clone(),
            asset_name: asset.name.clone(),
            download_date: Utc::now(),
        }
    }

    /// The parked bundle, if it is still on disk
    pub fn load_bundle(&self) -> Option<AppBundle> {
        AppBundle::load(&self.bundle_path)
    }
}

/// Storage for the single pending update of one application
#[derive(Debug, Clone)]
pub struct PendingUpdates {
    dir: PathBuf,
}

impl PendingUpdates {
    /// `<data dir>/<identifier>/PendingUpdates`
    pub fn for_identifier(identifier: Option<&str>) -> Result<Self, UpdateError> {
        let data_dir = dirs::data_dir().ok_or_else(|| {
            UpdateError::InvalidConfig("no user data directory on this platform".into())
        })?;
        let identifier = identifier.unwrap_or(FALLBACK_IDENTIFIER);
        Ok(Self::with_dir(data_dir.join(identifier).join(PENDING_DIR)))
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self) -> PathBuf {
        self.dir.join(RECORD_FILE)
    }

    /// Copy `bundle` into the pending area and write its record
    pub fn park(
        &self,
        bundle: &AppBundle,
        release: &Release,
        asset: &Asset,
    ) -> Result<DeferredUpdate, UpdateError> {
        fs::create_dir_all(&self.dir)?;
        let destination = self.dir.join(PENDING_BUNDLE);
        if destination.exists() {
            fs::remove_dir_all(&destination)?;
        }
        bundle.copy_to(&destination)?;

        let record = DeferredUpdate::new(destination, release, asset);
        self.save(&record)?;
        info!(
            "Deferred update {} stored in {}",
            record.release_version,
            self.dir.display()
        );
        Ok(record)
    }

    /// Write the record atomically
    pub fn save(&self, record: &DeferredUpdate) -> Result<(), UpdateError> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(record)?;

        let path = self.record_path();
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// The parked update, if any
    pub fn load(&self) -> Result<Option<DeferredUpdate>, UpdateError> {
        let path = self.record_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Remove the parked bundle and its record
    pub fn cleanup(&self) -> Result<(), UpdateError> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
            debug!("Removed {}", self.dir.display());
        }
        Ok(())
    }
}
