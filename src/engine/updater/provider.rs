//! Release Providers
//!
//! Abstraction over where releases come from. The updater only ever talks to
//! a [`ReleaseProvider`]; the GitHub client and the offline mock are the two
//! implementations shipped with the crate.

use std::future::Future;
use std::path::Path;

use super::download::DownloadStream;
use super::error::UpdateError;
use super::release::{Asset, Release};

/// Source of releases and their assets
pub trait ReleaseProvider: Send + Sync {
    /// List every release of `owner/repo`, in feed order
    fn fetch_releases(
        &self,
        owner: &str,
        repo: &str,
    ) -> impl Future<Output = Result<Vec<Release>, UpdateError>> + Send;

    /// Start downloading `asset` to `destination`
    fn download(
        &self,
        asset: &Asset,
        destination: &Path,
    ) -> impl Future<Output = Result<DownloadStream, UpdateError>> + Send;
}
