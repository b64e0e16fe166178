//! Code Signing Check
//!
//! A downloaded bundle is only accepted if its signing authority matches the
//! installed one. Identities are read from `codesign -dvvv`, which reports
//! on stderr; the first `Authority=` line is the leaf certificate.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::bundle::AppBundle;
use super::process::ExternalCommand;

const CODESIGN: &str = "/usr/bin/codesign";
const INSPECT_TIMEOUT: Duration = Duration::from_secs(30);
const AUTHORITY_PREFIX: &str = "Authority=";

/// Reads the signing identity of a bundle
#[derive(Debug, Clone)]
pub struct SigningInspector {
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Duration,
}

impl Default for SigningInspector {
    fn default() -> Self {
        Self::with_command(CODESIGN, ["-dvvv"])
    }
}

impl SigningInspector {
    /// Inspector running `program args... <bundle>`
    pub fn with_command<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: INSPECT_TIMEOUT,
        }
    }

    /// Leaf signing authority, or `None` if the bundle is unsigned or the
    /// tool fails
    pub async fn identity(&self, bundle: &Path) -> Option<String> {
        let output = ExternalCommand::new(&self.program)
            .args(&self.args)
            .arg(bundle)
            .timeout(self.timeout)
            .run()
            .await;

        match output {
            Ok(output) => parse_authority(&output.stderr),
            Err(e) => {
                debug!("No signing identity for {}: {}", bundle.display(), e);
                None
            }
        }
    }
}

/// First `Authority=` value in codesign output
pub fn parse_authority(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix(AUTHORITY_PREFIX))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Compares signing identities of the installed and downloaded bundles
#[derive(Debug, Clone, Default)]
pub struct AuthenticityValidator {
    inspector: SigningInspector,
    skip_validation: bool,
}

impl AuthenticityValidator {
    pub fn new(inspector: SigningInspector, skip_validation: bool) -> Self {
        Self {
            inspector,
            skip_validation,
        }
    }

    pub fn skips_validation(&self) -> bool {
        self.skip_validation
    }

    /// True when both bundles carry the same signing authority, or when
    /// validation is skipped.
    pub async fn is_authentic(&self, installed: &AppBundle, candidate: &AppBundle) -> bool {
        let (installed_id, candidate_id) = tokio::join!(
            self.inspector.identity(installed.path()),
            self.inspector.identity(candidate.path()),
        );

        match (installed_id, candidate_id) {
            (Some(a), Some(b)) if a == b => {
                info!("Signing identity verified: {}", a);
                true
            }
            (Some(a), Some(b)) => {
                if self.skip_validation {
                    warn!("Signing identity mismatch ignored: installed {:?}, download {:?}", a, b);
                } else {
                    warn!("Signing identity mismatch: installed {:?}, download {:?}", a, b);
                }
                self.skip_validation
            }
            _ => {
                if self.skip_validation {
                    warn!("Signing identity unavailable, validation skipped");
                } else {
                    warn!("Signing identity unavailable");
                }
                self.skip_validation
            }
        }
    }
}
