//! Mock Release Provider
//!
//! Offline provider for demos and tests. Releases come from a bundled JSON
//! fixture or a file on disk; downloads simulate progress and then write a
//! freshly built archive holding a runnable bundle.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::bundle::info_plist;
use super::download::DownloadStream;
use super::error::UpdateError;
use super::provider::ReleaseProvider;
use super::release::{Asset, MediaKind, Release, Tag};

const BUNDLED_FEED: &str = include_str!("fixtures/releases.mock.json");
const MOCK_EXECUTABLE: &str = "#!/bin/sh\necho Mock app launched\nsleep 3\n";

/// Where the mock feed is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockSource {
    Bundled,
    File(PathBuf),
}

/// Release provider that never touches the network
#[derive(Debug, Clone)]
pub struct MockReleaseProvider {
    source: MockSource,
    steps: u32,
    step_delay: Duration,
}

impl Default for MockReleaseProvider {
    fn default() -> Self {
        Self::new(MockSource::Bundled)
    }
}

impl MockReleaseProvider {
    pub fn new(source: MockSource) -> Self {
        Self {
            source,
            steps: 10,
            step_delay: Duration::from_millis(100),
        }
    }

    /// Number of progress ticks per download (at least one)
    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps.max(1);
        self
    }

    /// Pause between progress ticks
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    fn read_feed(&self) -> Result<String, UpdateError> {
        match &self.source {
            MockSource::Bundled => Ok(BUNDLED_FEED.to_string()),
            MockSource::File(path) => Ok(fs::read_to_string(path)?),
        }
    }
}

impl ReleaseProvider for MockReleaseProvider {
    async fn fetch_releases(&self, owner: &str, repo: &str) -> Result<Vec<Release>, UpdateError> {
        debug!("Serving mock releases for {}/{}", owner, repo);
        let feed = self.read_feed()?;
        Ok(serde_json::from_str(&feed)?)
    }

    async fn download(&self, asset: &Asset, destination: &Path) -> Result<DownloadStream, UpdateError> {
        let steps = self.steps;
        let delay = self.step_delay;
        let asset = asset.clone();
        let destination = destination.to_path_buf();

        info!("Simulating download of {}", asset.name);
        Ok(DownloadStream::spawn(Some(destination.clone()), move |sink| async move {
            for step in 1..=steps {
                tokio::time::sleep(delay).await;
                sink.progress(f64::from(step) / f64::from(steps)).await?;
            }

            let target = destination.clone();
            tokio::task::spawn_blocking(move || write_mock_archive(&target, &asset))
                .await
                .map_err(|e| UpdateError::Io(io::Error::other(e)))??;
            Ok(destination)
        }))
    }
}

/// Write an archive of the kind `asset` declares, containing a bundle named
/// after the asset whose Info.plist carries the version from the asset name.
pub fn write_mock_archive(destination: &Path, asset: &Asset) -> io::Result<()> {
    let (app_name, version) = mock_identity(&asset.name);
    let entries = mock_bundle_entries(&app_name, &version);

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    match archive_kind(asset) {
        MediaKind::Tar => write_tar_gz(destination, &entries),
        _ => write_zip(destination, &entries),
    }
}

fn archive_kind(asset: &Asset) -> MediaKind {
    match asset.media_kind {
        MediaKind::Unknown if asset.name.ends_with(".tar") || asset.name.ends_with(".tar.gz") => {
            MediaKind::Tar
        }
        MediaKind::Unknown => MediaKind::Zip,
        kind => kind,
    }
}

/// App name and version encoded in an asset name like `MockApp-1.2.3.zip`
fn mock_identity(asset_name: &str) -> (String, String) {
    let stem = asset_name
        .trim_end_matches(".zip")
        .trim_end_matches(".gz")
        .trim_end_matches(".tar")
        .trim_end_matches(".tar");

    match stem.split_once('-') {
        Some((name, version)) if Tag::parse(version).version().is_some() => {
            (name.to_string(), version.to_string())
        }
        _ => (stem.to_string(), "1.0.0".to_string()),
    }
}

enum MockEntry {
    Dir(String),
    File { path: String, body: Vec<u8>, mode: u32 },
}

fn mock_bundle_entries(app_name: &str, version: &str) -> Vec<MockEntry> {
    let root = format!("{}.app", app_name);
    let identifier = format!("com.example.{}", app_name.to_lowercase());
    vec![
        MockEntry::Dir(format!("{}/", root)),
        MockEntry::Dir(format!("{}/Contents/", root)),
        MockEntry::Dir(format!("{}/Contents/MacOS/", root)),
        MockEntry::Dir(format!("{}/Contents/Resources/", root)),
        MockEntry::File {
            path: format!("{}/Contents/Info.plist", root),
            body: info_plist(app_name, &identifier, version, app_name).into_bytes(),
            mode: 0o644,
        },
        MockEntry::File {
            path: format!("{}/Contents/MacOS/{}", root, app_name),
            body: MOCK_EXECUTABLE.as_bytes().to_vec(),
            mode: 0o755,
        },
    ]
}

fn write_zip(destination: &Path, entries: &[MockEntry]) -> io::Result<()> {
    let mut zip = ZipWriter::new(File::create(destination)?);
    for entry in entries {
        match entry {
            MockEntry::Dir(path) => {
                let options = SimpleFileOptions::default().unix_permissions(0o755);
                zip.add_directory(path.as_str(), options).map_err(io::Error::other)?;
            }
            MockEntry::File { path, body, mode } => {
                let options = SimpleFileOptions::default().unix_permissions(*mode);
                zip.start_file(path.as_str(), options).map_err(io::Error::other)?;
                zip.write_all(body)?;
            }
        }
    }
    zip.finish().map_err(io::Error::other)?;
    Ok(())
}

fn write_tar_gz(destination: &Path, entries: &[MockEntry]) -> io::Result<()> {
    let encoder = GzEncoder::new(File::create(destination)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        match entry {
            MockEntry::Dir(path) => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                header.set_cksum();
                builder.append_data(&mut header, path, io::empty())?;
            }
            MockEntry::File { path, body, mode } => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(*mode);
                header.set_size(body.len() as u64);
                header.set_cksum();
                builder.append_data(&mut header, path, body.as_slice())?;
            }
        }
    }
    builder.into_inner()?.finish()?;
    Ok(())
}
