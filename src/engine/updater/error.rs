//! Update Errors
//!
//! One error type for the whole pipeline, classified so callers can decide
//! what to log, what to retry and what to show the user.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use super::process::ProcessError;

/// Broad failure classes of an update cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing installed-version identity, malformed URLs. Never retried.
    Structural,
    /// No eligible update. Expected, not an anomaly.
    Benign,
    /// Network failures and malformed download streams.
    Transport,
    /// Extraction and bundle problems. Partial content is discarded.
    Integrity,
    /// Signing identity mismatch.
    Trust,
    /// Replacing or relaunching failed. The running instance stays alive.
    InstallTime,
    /// The owning task was cancelled.
    Cancelled,
}

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Running build has no resolvable bundle executable or version")]
    BundleExecutable,
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("No valid update available")]
    NoValidUpdate,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid HTTP response ({status}) for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("Download stream ended without a finished event")]
    MissingTerminalEvent,
    #[error("Failed to decode release feed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Archive extraction failed: {0}")]
    UnzipFailed(String),
    #[error("Archive entry escapes extraction directory: {}", .0.display())]
    PathTraversalDetected(PathBuf),
    #[error("Archive extraction timed out after {0} seconds")]
    ExtractionTimeout(u64),
    #[error("Downloaded bundle is invalid: {}", .0.display())]
    InvalidDownloadedBundle(PathBuf),
    #[error("Code signing identity of the download does not match the installed build")]
    CodeSigningIdentity,
    #[error("Failed to replace installed bundle: {0}")]
    ReplaceFailed(String),
    #[error("Failed to launch the updated application: {0}")]
    RelaunchFailed(String),
    #[error("The operation was cancelled")]
    Cancelled,
}

impl UpdateError {
    /// Failure class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BundleExecutable | Self::InvalidUrl(_) | Self::InvalidConfig(_) => {
                ErrorKind::Structural
            }
            Self::NoValidUpdate => ErrorKind::Benign,
            Self::Http(_)
            | Self::HttpStatus { .. }
            | Self::MissingTerminalEvent
            | Self::Decode(_)
            | Self::Io(_) => ErrorKind::Transport,
            Self::UnzipFailed(_)
            | Self::PathTraversalDetected(_)
            | Self::ExtractionTimeout(_)
            | Self::InvalidDownloadedBundle(_) => ErrorKind::Integrity,
            Self::CodeSigningIdentity => ErrorKind::Trust,
            Self::ReplaceFailed(_) | Self::RelaunchFailed(_) => ErrorKind::InstallTime,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// True for the expected "nothing to do" outcome
    pub fn is_benign(&self) -> bool {
        self.kind() == ErrorKind::Benign
    }

    /// True if this error represents a cancelled operation
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::Interrupted,
            _ => false,
        }
    }
}

impl From<ProcessError> for UpdateError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::Timeout { seconds, .. } => Self::ExtractionTimeout(seconds),
            other => Self::UnzipFailed(other.to_string()),
        }
    }
}
