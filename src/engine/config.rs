//! Updater Configuration Module
//! Handles loading and validating appupdater.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::updater::{UpdateError, UrlTransform};

pub const CONFIG_FILE: &str = "appupdater.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Repository must be given as owner/repo, got {0:?}")]
    InvalidRepository(String),
}

impl From<ConfigError> for UpdateError {
    fn from(e: ConfigError) -> Self {
        UpdateError::InvalidConfig(e.to_string())
    }
}

/// String substitution applied to every outbound URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// GitHub repository as `owner/repo`
    pub repository: String,
    /// Asset name prefix; the repository name when unset
    #[serde(default)]
    pub asset_prefix: Option<String>,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default)]
    pub allow_prereleases: bool,
    #[serde(default)]
    pub skip_signing_validation: bool,
    #[serde(default)]
    pub mirror: Option<MirrorConfig>,
    #[serde(skip)]
    pub url_transform: Option<UrlTransform>,
}

fn default_check_interval() -> u64 {
    24 * 60 * 60
}

impl UpdaterConfig {
    pub fn new(owner: &str, repo: &str) -> Self {
        Self {
            repository: format!("{}/{}", owner, repo),
            asset_prefix: None,
            check_interval_secs: default_check_interval(),
            allow_prereleases: false,
            skip_signing_validation: false,
            mirror: None,
            url_transform: None,
        }
    }

    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        Self::load_file(&project_dir.join(CONFIG_FILE))
    }

    pub fn load_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path.to_path_buf()));
        }
        let content = std::fs::read_to_string(config_path)?;
        let config: UpdaterConfig = serde_json::from_str(&content)?;
        config.owner_repo()?;
        Ok(config)
    }

    pub fn save(&self, project_dir: &Path) -> Result<(), ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Split `repository` into owner and repo
    pub fn owner_repo(&self) -> Result<(&str, &str), ConfigError> {
        match self.repository.split_once('/') {
            Some((owner, repo))
                if !owner.trim().is_empty() && !repo.trim().is_empty() && !repo.contains('/') =>
            {
                Ok((owner.trim(), repo.trim()))
            }
            _ => Err(ConfigError::InvalidRepository(self.repository.clone())),
        }
    }

    pub fn asset_prefix(&self) -> String {
        match &self.asset_prefix {
            Some(prefix) if !prefix.is_empty() => prefix.clone(),
            _ => self
                .owner_repo()
                .map(|(_, repo)| repo.to_string())
                .unwrap_or_default(),
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Explicit transform, else one built from `mirror`
    pub fn request_transform(&self) -> Option<UrlTransform> {
        self.url_transform.clone().or_else(|| {
            self.mirror
                .as_ref()
                .map(|m| UrlTransform::replace(m.from.clone(), m.to.clone()))
        })
    }
}
