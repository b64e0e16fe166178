//! Self-Update Engine
//!
//! Checks a release feed, downloads and verifies a newer bundle, and swaps
//! it in for the running installation before relaunching.
//!
//! Components:
//! - `release` / `selector` - Feed model and update selection
//! - `provider` - Release sources (`github`, `mock`)
//! - `download` - Cancellable streaming download with progress
//! - `extract` - Archive extraction with path traversal checks
//! - `signing` - Signing identity comparison
//! - `install` - Bundle replacement and relaunch
//! - `deferred` - Parking downloaded updates for later
//! - `orchestrator` - The update cycle and its observable state

pub mod bundle;
pub mod deferred;
pub mod download;
pub mod error;
pub mod extract;
pub mod github;
pub mod install;
pub mod mock;
pub mod orchestrator;
pub mod process;
pub mod provider;
pub mod release;
pub mod selector;
pub mod signing;
pub mod state;
pub mod transform;

pub use bundle::AppBundle;
pub use deferred::{DeferredUpdate, PendingUpdates};
pub use download::{DownloadEvent, DownloadStream, Downloader};
pub use error::{ErrorKind, UpdateError};
pub use extract::ArchiveExtractor;
pub use github::GithubReleaseProvider;
pub use install::{Installer, Launcher};
pub use mock::{MockReleaseProvider, MockSource};
pub use orchestrator::{AppUpdater, DownloadedUpdate};
pub use provider::ReleaseProvider;
pub use release::{Asset, MediaKind, Release, Tag};
pub use selector::select_update;
pub use signing::{AuthenticityValidator, SigningInspector};
pub use state::{DownloadedBundle, LastError, UpdateState};
pub use transform::UrlTransform;
