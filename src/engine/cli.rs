//! AppUpdater CLI Module
//! Command-line interface for checking, installing and deferring updates

pub mod formatter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "appupdater")]
#[command(version)]
#[command(about = "Self-update engine for application bundles", long_about = None)]
pub struct Cli {
    /// Directory holding appupdater.config.json (defaults to current directory)
    #[arg(short, long, global = true)]
    pub project: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check for an update and download it
    Check(CheckArgs),

    /// Show the releases listed by the feed
    Releases(SourceArgs),

    /// Deferred update management
    Pending {
        #[command(subcommand)]
        action: PendingAction,
    },
}

/// Where releases come from and which bundle they apply to
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Repository as owner/repo, overriding the config file
    #[arg(short, long)]
    pub repo: Option<String>,

    /// Asset name prefix, overriding the config file
    #[arg(long)]
    pub prefix: Option<String>,

    /// Serve releases from the offline mock feed
    #[arg(long)]
    pub mock: bool,

    /// JSON feed file for the mock provider
    #[arg(long, requires = "mock")]
    pub fixture: Option<PathBuf>,

    /// Installed bundle to update (defaults to the running bundle)
    #[arg(short, long)]
    pub bundle: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Consider prereleases
    #[arg(long)]
    pub prereleases: bool,

    /// Accept downloads whose signing identity is missing or differs
    #[arg(long)]
    pub skip_signing: bool,

    /// Install and relaunch once downloaded
    #[arg(long, conflicts_with = "defer")]
    pub install: bool,

    /// Park the download for a later run
    #[arg(long)]
    pub defer: bool,
}

#[derive(Subcommand, Debug)]
pub enum PendingAction {
    /// Show the parked update
    Show(PendingArgs),

    /// Install the parked update and relaunch
    Install(PendingArgs),

    /// Discard the parked update
    Clean(PendingArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct PendingArgs {
    /// Installed bundle the parked update belongs to
    #[arg(short, long)]
    pub bundle: Option<PathBuf>,

    /// Bundle identifier used to locate the pending directory
    #[arg(long)]
    pub identifier: Option<String>,
}

impl Cli {
    pub fn get_project_dir(&self) -> PathBuf {
        self.project
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}
