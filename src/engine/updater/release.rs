//! Release Feed Model
//!
//! Releases and assets as published by the feed. Decoding is lenient where the
//! feed is: unparseable tags become [`Tag::Unparsed`] and unknown content
//! types become [`MediaKind::Unknown`] instead of failing the whole list.

use semver::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

/// Release tag. Unparsed tags sort below every real version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Tag {
    #[default]
    Unparsed,
    Version(Version),
}

impl Tag {
    /// Parse a feed tag, accepting an optional leading `v`
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        Version::parse(trimmed)
            .map(Tag::Version)
            .unwrap_or(Tag::Unparsed)
    }

    pub fn version(&self) -> Option<&Version> {
        match self {
            Tag::Version(v) => Some(v),
            Tag::Unparsed => None,
        }
    }
}

impl From<Version> for Tag {
    fn from(v: Version) -> Self {
        Tag::Version(v)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Version(v) => write!(f, "{}", v),
            Tag::Unparsed => write!(f, "unparsed"),
        }
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match value {
            serde_json::Value::String(s) => Tag::parse(&s),
            _ => Tag::Unparsed,
        })
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Tag::Version(v) => serializer.serialize_str(&v.to_string()),
            Tag::Unparsed => serializer.serialize_none(),
        }
    }
}

/// Archive kind declared by the asset's content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MediaKind {
    Zip,
    Tar,
    #[default]
    Unknown,
}

impl MediaKind {
    pub fn from_content_type(content_type: &str) -> Self {
        match content_type {
            "application/zip" => MediaKind::Zip,
            "application/x-bzip2" | "application/x-xz" | "application/x-gzip" => MediaKind::Tar,
            _ => MediaKind::Unknown,
        }
    }

    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            MediaKind::Zip => Some("application/zip"),
            MediaKind::Tar => Some("application/x-gzip"),
            MediaKind::Unknown => None,
        }
    }
}

impl<'de> Deserialize<'de> for MediaKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match value {
            serde_json::Value::String(s) => MediaKind::from_content_type(&s),
            _ => MediaKind::Unknown,
        })
    }
}

impl Serialize for MediaKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.content_type() {
            Some(ct) => serializer.serialize_str(ct),
            None => serializer.serialize_none(),
        }
    }
}

/// Downloadable file attached to a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
    #[serde(rename = "content_type", default)]
    pub media_kind: MediaKind,
}

impl Asset {
    pub fn new(name: impl Into<String>, download_url: impl Into<String>, media_kind: MediaKind) -> Self {
        Self {
            name: name.into(),
            download_url: download_url.into(),
            media_kind,
        }
    }

    /// Whether this asset is the archive for `<prefix>-<tag>`.
    ///
    /// Case-insensitive on the name, exact on the extension, and the declared
    /// media kind has to agree with the extension.
    pub fn matches(&self, prefix: &str, tag: &Tag) -> bool {
        let expected = format!("{}-{}", prefix, tag).to_lowercase();
        let path = Path::new(&self.name);
        let (Some(stem), Some(ext)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|e| e.to_str()),
        ) else {
            return false;
        };
        let stem = stem.to_lowercase();

        match (ext, self.media_kind) {
            ("zip", MediaKind::Zip) => stem == expected,
            ("tar", MediaKind::Tar) => stem == format!("{}.tar", expected),
            _ => false,
        }
    }
}

/// One entry of the release feed. Identity is the tag alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    #[serde(rename = "tag_name", default)]
    pub tag: Tag,
    #[serde(rename = "prerelease", default)]
    pub is_prerelease: bool,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(rename = "body", default, deserialize_with = "null_as_default")]
    pub notes: String,
    #[serde(rename = "name", default, deserialize_with = "null_as_default")]
    pub display_name: String,
    #[serde(rename = "html_url", default, deserialize_with = "null_as_default")]
    pub details_url: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Release {
    pub fn new(tag: Tag, is_prerelease: bool, assets: Vec<Asset>) -> Self {
        Self {
            display_name: format!("v{}", tag),
            tag,
            is_prerelease,
            assets,
            notes: String::new(),
            details_url: String::new(),
        }
    }

    /// First asset, in feed order, that matches the prefix for this tag
    pub fn viable_asset(&self, prefix: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.matches(prefix, &self.tag))
    }
}

impl PartialEq for Release {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
    }
}

impl Eq for Release {}

impl PartialOrd for Release {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Release {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tag.cmp(&other.tag)
    }
}
