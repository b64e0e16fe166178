//! AppUpdater CLI - Main entry point for CLI binary
//!
//! This binary provides the `appupdater` tool for checking, installing and
//! deferring updates of an application bundle.

use anyhow::{anyhow, bail, Context, Result};
use appupdater_lib::engine::{
    cli::{formatter::{format_duration, CliFormatter}, CheckArgs, Cli, Commands, OutputFormat, PendingAction, PendingArgs, SourceArgs},
    config::{ConfigError, UpdaterConfig},
    updater::{
        AppBundle, AppUpdater, GithubReleaseProvider, MockReleaseProvider, MockSource,
        PendingUpdates, ReleaseProvider, UpdateState,
    },
};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run_cli(cli).await {
        CliFormatter::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> Result<()> {
    let project_dir = cli.get_project_dir();
    let json_output = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Check(args) => cmd_check(args, &project_dir, json_output).await,
        Commands::Releases(source) => cmd_releases(source, &project_dir, json_output).await,
        Commands::Pending { action } => cmd_pending(action, &project_dir, json_output).await,
    }
}

fn load_config(source: &SourceArgs, project_dir: &Path) -> Result<UpdaterConfig> {
    let mut config = match UpdaterConfig::load(project_dir) {
        Ok(config) => config,
        Err(ConfigError::NotFound(_)) if source.repo.is_some() => UpdaterConfig::new("", ""),
        Err(ConfigError::NotFound(_)) if source.mock => UpdaterConfig::new("example", "MockApp"),
        Err(e) => return Err(e).context("Pass --repo owner/repo or create appupdater.config.json"),
    };

    if let Some(repo) = &source.repo {
        config.repository = repo.clone();
    }
    if let Some(prefix) = &source.prefix {
        config.asset_prefix = Some(prefix.clone());
    }
    config.owner_repo()?;
    Ok(config)
}

fn mock_provider(source: &SourceArgs) -> MockReleaseProvider {
    match &source.fixture {
        Some(path) => MockReleaseProvider::new(MockSource::File(path.clone())),
        None => MockReleaseProvider::default(),
    }
}

fn load_bundle(path: &Path) -> Result<AppBundle> {
    AppBundle::load(path).ok_or_else(|| anyhow!("{} is not an application bundle", path.display()))
}

fn build_updater<P: ReleaseProvider>(
    config: UpdaterConfig,
    provider: P,
    bundle: Option<&PathBuf>,
) -> Result<AppUpdater<P>> {
    let updater = AppUpdater::new(config, provider);
    match bundle {
        Some(path) => Ok(updater.with_installed_bundle(load_bundle(path)?)),
        None => Ok(updater),
    }
}

async fn cmd_check(args: CheckArgs, project_dir: &Path, json: bool) -> Result<()> {
    let mut config = load_config(&args.source, project_dir)?;
    config.allow_prereleases |= args.prereleases;
    config.skip_signing_validation |= args.skip_signing;

    if args.source.mock {
        let provider = mock_provider(&args.source);
        let updater = build_updater(config, provider, args.source.bundle.as_ref())?;
        run_check(updater, &args, json).await
    } else {
        let provider = GithubReleaseProvider::new(config.request_transform())?;
        let updater = build_updater(config, provider, args.source.bundle.as_ref())?;
        run_check(updater, &args, json).await
    }
}

fn print_state(state: &UpdateState, json: bool) {
    if json {
        match serde_json::to_string(state) {
            Ok(line) => println!("{}", line),
            Err(e) => CliFormatter::error(&e.to_string()),
        }
    } else {
        CliFormatter::state(state);
    }
}

async fn run_check<P: ReleaseProvider + 'static>(
    updater: AppUpdater<P>,
    args: &CheckArgs,
    json: bool,
) -> Result<()> {
    let updater = Arc::new(updater);
    let mut states = updater.subscribe();
    let mut check = updater.spawn_check();

    if !json {
        CliFormatter::header("Checking for updates");
        CliFormatter::kv("Repository", &updater.config().repository);
        if let Some(bundle) = updater.installed_bundle() {
            CliFormatter::kv("Installed", &bundle.path().display().to_string());
        }
        CliFormatter::kv(
            "Check interval",
            &format_duration(updater.config().check_interval().as_secs()),
        );
        if updater.config().skip_signing_validation {
            CliFormatter::warning("Signing identity validation is disabled");
        }
    }

    let result = loop {
        tokio::select! {
            Some(state) = states.recv() => print_state(&state, json),
            joined = &mut check => break joined?,
            _ = tokio::signal::ctrl_c() => {
                check.abort();
                bail!("Update check cancelled");
            }
        }
    };
    while let Ok(state) = states.try_recv() {
        print_state(&state, json);
    }

    let update = match result {
        Ok(update) => update,
        Err(e) if e.is_benign() => {
            if json {
                println!("{}", serde_json::json!({ "status": "up_to_date" }));
            } else {
                CliFormatter::success("Already up to date");
            }
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if args.install {
        if !json {
            CliFormatter::info(&format!("Installing {} and relaunching", update.release.tag));
        }
        updater.install(&update.bundle).await?;
    } else if args.defer {
        let store = updater.pending_updates()?;
        let record = updater.defer(&update, &store)?;
        if json {
            println!("{}", serde_json::to_string(&record)?);
        } else {
            CliFormatter::success(&format!(
                "Update {} parked in {}",
                record.release_version,
                store.dir().display()
            ));
        }
    } else if !json {
        CliFormatter::info("Run again with --install to apply or --defer to keep it for later");
    }
    Ok(())
}

async fn cmd_releases(source: SourceArgs, project_dir: &Path, json: bool) -> Result<()> {
    let config = load_config(&source, project_dir)?;
    let (owner, repo) = config.owner_repo()?;

    let releases = if source.mock {
        mock_provider(&source).fetch_releases(owner, repo).await?
    } else {
        GithubReleaseProvider::new(config.request_transform())?
            .fetch_releases(owner, repo)
            .await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&releases)?);
    } else {
        CliFormatter::header(&format!("Releases of {}", config.repository));
        CliFormatter::releases(&releases);
    }
    Ok(())
}

fn installed_for(args: &PendingArgs) -> Result<Option<AppBundle>> {
    match &args.bundle {
        Some(path) => load_bundle(path).map(Some),
        None => Ok(AppBundle::main()),
    }
}

fn pending_store(args: &PendingArgs, installed: Option<&AppBundle>) -> Result<PendingUpdates> {
    let identifier = args
        .identifier
        .as_deref()
        .or_else(|| installed.and_then(|b| b.identifier()));
    Ok(PendingUpdates::for_identifier(identifier)?)
}

async fn cmd_pending(action: PendingAction, project_dir: &Path, json: bool) -> Result<()> {
    match action {
        PendingAction::Show(args) => {
            let installed = installed_for(&args)?;
            let store = pending_store(&args, installed.as_ref())?;
            match store.load()? {
                Some(record) if json => println!("{}", serde_json::to_string_pretty(&record)?),
                Some(record) => {
                    CliFormatter::header("Pending update");
                    CliFormatter::deferred(&record);
                }
                None if json => println!("null"),
                None => CliFormatter::info("No pending update"),
            }
        }
        PendingAction::Install(args) => {
            let installed = installed_for(&args)?
                .context("Not running from an application bundle; pass --bundle")?;
            let store = pending_store(&args, Some(&installed))?;
            let record = store.load()?.context("No pending update")?;

            let config = match UpdaterConfig::load(project_dir) {
                Ok(config) => config,
                Err(ConfigError::NotFound(_)) => UpdaterConfig::new("", ""),
                Err(e) => return Err(e.into()),
            };
            let provider = GithubReleaseProvider::new(config.request_transform())?;
            let updater = AppUpdater::new(config, provider).with_installed_bundle(installed);

            if !json {
                CliFormatter::info(&format!(
                    "Installing {} and relaunching",
                    record.release_version
                ));
            }
            updater.install_deferred(&store).await?;
        }
        PendingAction::Clean(args) => {
            let installed = installed_for(&args)?;
            let store = pending_store(&args, installed.as_ref())?;
            store.cleanup()?;
            if !json {
                CliFormatter::success("Pending update removed");
            }
        }
    }
    Ok(())
}
