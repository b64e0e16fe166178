//! GitHub Release Provider
//!
//! Lists releases through the GitHub REST API and downloads assets through
//! their browser download URLs.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Url;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::download::{DownloadStream, Downloader};
use super::error::UpdateError;
use super::provider::ReleaseProvider;
use super::release::{Asset, Release};
use super::transform::{apply_transform, UrlTransform};

pub const GITHUB_API_BASE: &str = "https://api.github.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Releases from `api.github.com`
#[derive(Clone)]
pub struct GithubReleaseProvider {
    client: reqwest::Client,
    api_base: String,
    transform: Option<UrlTransform>,
}

impl GithubReleaseProvider {
    pub fn new(transform: Option<UrlTransform>) -> Result<Self, UpdateError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        let client = reqwest::Client::builder()
            .user_agent(concat!("appupdater/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_base: GITHUB_API_BASE.to_string(),
            transform,
        })
    }

    /// Point at a different API root (GitHub Enterprise, test servers)
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Listing URL for `owner/repo`, after the transform
    pub fn releases_url(&self, owner: &str, repo: &str) -> Result<Url, UpdateError> {
        let raw = format!("{}/repos/{}/{}/releases", self.api_base, owner, repo);
        let url = Url::parse(&raw).map_err(|_| UpdateError::InvalidUrl(raw))?;
        Ok(apply_transform(self.transform.as_ref(), url))
    }
}

impl ReleaseProvider for GithubReleaseProvider {
    async fn fetch_releases(&self, owner: &str, repo: &str) -> Result<Vec<Release>, UpdateError> {
        let url = self.releases_url(owner, repo)?;
        info!("Fetching releases from {}", url);

        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(UpdateError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        let releases: Vec<Release> = serde_json::from_slice(&body)?;
        debug!("Feed lists {} releases", releases.len());
        Ok(releases)
    }

    async fn download(&self, asset: &Asset, destination: &Path) -> Result<DownloadStream, UpdateError> {
        Downloader::new(self.client.clone(), self.transform.clone()).download(asset, destination)
    }
}
