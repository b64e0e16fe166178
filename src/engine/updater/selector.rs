//! Update Selection
//!
//! Pure decision of which release (and which of its assets) to install.

use semver::Version;

use super::release::{Asset, Release};

/// Pick the newest eligible release and its matching asset.
///
/// Prereleases are ignored unless `include_prereleases` is set. Equal
/// versions never count as an update. Assets are matched in feed order and
/// the first match wins.
pub fn select_update(
    releases: &[Release],
    installed: &Version,
    asset_prefix: &str,
    include_prereleases: bool,
) -> Option<(Release, Asset)> {
    // `max` keeps the last of equal elements, same as a stable sort + last.
    let latest = releases
        .iter()
        .filter(|r| include_prereleases || !r.is_prerelease)
        .max()?;

    let latest_version = latest.tag.version()?;
    if installed >= latest_version {
        return None;
    }

    let asset = latest.viable_asset(asset_prefix)?;
    Some((latest.clone(), asset.clone()))
}
