//! AppUpdater - self-update engine for directory-style application bundles
//!
//! Checks a release feed, downloads and verifies a newer build, and swaps it
//! in for the running installation before relaunching.

pub mod engine;

pub use engine::config::UpdaterConfig;
pub use engine::updater::{AppUpdater, UpdateError, UpdateState};
