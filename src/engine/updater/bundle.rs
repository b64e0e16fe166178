//! Application Bundles
//!
//! A bundle is a directory named `<Name>.app` with the layout
//!
//! ```text
//! Name.app/
//!   Contents/
//!     Info.plist
//!     MacOS/<executable>
//!     Resources/
//! ```

use regex::Regex;
use semver::Version;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::release::Tag;

/// Directory suffix of application bundles
pub const BUNDLE_EXTENSION: &str = "app";

/// The handful of Info.plist keys the updater cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleInfo {
    pub executable: Option<String>,
    pub identifier: Option<String>,
    pub short_version: Option<String>,
}

impl BundleInfo {
    /// Read string values out of an XML property list
    pub fn parse(plist: &str) -> Self {
        Self {
            executable: plist_string(plist, "CFBundleExecutable"),
            identifier: plist_string(plist, "CFBundleIdentifier"),
            short_version: plist_string(plist, "CFBundleShortVersionString"),
        }
    }
}

fn plist_string(plist: &str, key: &str) -> Option<String> {
    let pattern = format!(
        r"<key>\s*{}\s*</key>\s*<string>([^<]*)</string>",
        regex::escape(key)
    );
    let re = Regex::new(&pattern).ok()?;
    re.captures(plist)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Render a minimal Info.plist
pub fn info_plist(name: &str, identifier: &str, version: &str, executable: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>CFBundleName</key><string>{name}</string>
    <key>CFBundleIdentifier</key><string>{identifier}</string>
    <key>CFBundleVersion</key><string>1</string>
    <key>CFBundleShortVersionString</key><string>{version}</string>
    <key>CFBundlePackageType</key><string>APPL</string>
    <key>CFBundleExecutable</key><string>{executable}</string>
</dict>
</plist>
"#
    )
}

/// A directory-style application bundle on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppBundle {
    path: PathBuf,
    info: BundleInfo,
}

impl AppBundle {
    /// Open the bundle at `path`. Returns `None` if it is not a directory.
    pub fn load(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        if !path.is_dir() {
            return None;
        }
        let info = fs::read_to_string(path.join("Contents").join("Info.plist"))
            .map(|plist| BundleInfo::parse(&plist))
            .unwrap_or_default();
        Some(Self {
            path: path.to_path_buf(),
            info,
        })
    }

    /// The bundle the running executable lives in, if any
    pub fn main() -> Option<Self> {
        let exe = std::env::current_exe().ok()?;
        let exe = fs::canonicalize(&exe).unwrap_or(exe);
        let bundle = exe.parent()?.parent()?.parent()?;
        if bundle.extension().is_some_and(|e| e == BUNDLE_EXTENSION) {
            Self::load(bundle)
        } else {
            None
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &BundleInfo {
        &self.info
    }

    pub fn identifier(&self) -> Option<&str> {
        self.info.identifier.as_deref()
    }

    /// Declared executable, falling back to the bundle name
    pub fn executable_path(&self) -> Option<PathBuf> {
        let name = match &self.info.executable {
            Some(name) => name.clone(),
            None => self.path.file_stem()?.to_str()?.to_string(),
        };
        Some(self.path.join("Contents").join("MacOS").join(name))
    }

    /// Executable path, only if the file exists
    pub fn existing_executable(&self) -> Option<PathBuf> {
        self.executable_path().filter(|p| p.is_file())
    }

    pub fn version(&self) -> Option<Version> {
        let raw = self.info.short_version.as_deref()?;
        Tag::parse(raw).version().cloned()
    }

    /// Recursively copy the bundle to `destination`, keeping symlinks as
    /// symlinks and file permissions as they are.
    pub fn copy_to(&self, destination: &Path) -> io::Result<AppBundle> {
        copy_tree(&self.path, destination)?;
        Self::load(destination).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "copied bundle is not a directory")
        })
    }
}

fn copy_tree(source: &Path, destination: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let target = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    let points_to = fs::read_link(link)?;
    std::os::unix::fs::symlink(points_to, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    fs::copy(link, target).map(|_| ())
}
