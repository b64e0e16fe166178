//! Request URL Transform
//!
//! Optional hook applied to every outbound URL (feed listing and asset
//! downloads), typically to route through a proxy or mirror.

use reqwest::Url;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

type TransformFn = dyn Fn(&Url) -> Result<Url, String> + Send + Sync;

/// Cloneable URL rewrite hook
#[derive(Clone)]
pub struct UrlTransform {
    inner: Arc<TransformFn>,
}

impl UrlTransform {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Url) -> Result<Url, String> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Rewrite by string substitution, e.g. a mirror host for `github.com`
    pub fn replace(from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        let to = to.into();
        Self::new(move |url| {
            Url::parse(&url.as_str().replace(&from, &to)).map_err(|e| e.to_string())
        })
    }

    pub fn apply(&self, url: &Url) -> Result<Url, String> {
        (self.inner)(url)
    }

    /// Apply the transform, keeping the original URL if it fails
    pub fn apply_or_original(&self, url: Url) -> Url {
        match self.apply(&url) {
            Ok(transformed) => transformed,
            Err(e) => {
                warn!("URL transform failed for {}: {}", url, e);
                url
            }
        }
    }
}

impl fmt::Debug for UrlTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UrlTransform(..)")
    }
}

/// Apply an optional transform
pub fn apply_transform(transform: Option<&UrlTransform>, url: Url) -> Url {
    match transform {
        Some(t) => t.apply_or_original(url),
        None => url,
    }
}
