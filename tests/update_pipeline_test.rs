//! End-to-end update cycles against the offline mock provider

#![cfg(unix)]

use appupdater_lib::engine::config::UpdaterConfig;
use appupdater_lib::engine::updater::bundle::info_plist;
use appupdater_lib::engine::updater::{
    AppBundle, AppUpdater, ErrorKind, Launcher, MockReleaseProvider, MockSource, PendingUpdates,
    SigningInspector, UpdateError, UpdateState,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();

fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        if std::env::var("RUST_LOG").is_err() {
            return;
        }
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn unzip_available() -> bool {
    which::which("unzip").is_ok()
}

struct Fixture {
    _root: TempDir,
    apps: PathBuf,
    installed: AppBundle,
    terminated: Arc<AtomicBool>,
}

impl Fixture {
    fn new(version: &str) -> Self {
        init_test_logging();
        let root = tempdir().unwrap();
        let apps = root.path().join("Applications");
        let path = apps.join("MockApp.app");
        fs::create_dir_all(path.join("Contents/MacOS")).unwrap();
        fs::create_dir_all(path.join("Contents/Resources")).unwrap();
        fs::write(
            path.join("Contents/Info.plist"),
            info_plist("MockApp", "com.example.mockapp", version, "MockApp"),
        )
        .unwrap();
        fs::write(path.join("Contents/MacOS/MockApp"), "#!/bin/sh\nsleep 3\n").unwrap();

        Self {
            installed: AppBundle::load(&path).unwrap(),
            apps,
            _root: root,
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    fn updater(&self, provider: MockReleaseProvider) -> AppUpdater<MockReleaseProvider> {
        self.updater_with(provider, |_| {})
    }

    fn updater_with(
        &self,
        provider: MockReleaseProvider,
        configure: impl FnOnce(&mut UpdaterConfig),
    ) -> AppUpdater<MockReleaseProvider> {
        let mut config = UpdaterConfig::new("example", "MockApp");
        config.skip_signing_validation = true;
        configure(&mut config);

        let terminated = Arc::clone(&self.terminated);
        AppUpdater::new(config, provider)
            .with_installed_bundle(self.installed.clone())
            .with_signing_inspector(SigningInspector::with_command("/nonexistent/codesign", ["-dvvv"]))
            .with_launcher(Launcher::Executable {
                interpreter: Some(PathBuf::from("/bin/sh")),
            })
            .with_terminate_hook(move || terminated.store(true, Ordering::SeqCst))
    }

    fn installed_version(&self) -> String {
        AppBundle::load(self.installed.path())
            .and_then(|b| b.version())
            .map(|v| v.to_string())
            .unwrap_or_default()
    }

    fn work_dirs(&self) -> Vec<PathBuf> {
        work_dirs_in(&self.apps)
    }
}

fn work_dirs_in(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with(".appupdater-"))
        })
        .collect()
}

fn fast_provider() -> MockReleaseProvider {
    MockReleaseProvider::default()
        .with_steps(3)
        .with_step_delay(Duration::from_millis(1))
}

fn drain(rx: &mut UnboundedReceiver<UpdateState>) -> Vec<UpdateState> {
    let mut states = Vec::new();
    while let Ok(state) = rx.try_recv() {
        states.push(state);
    }
    states
}

fn tag_of(state: &UpdateState) -> String {
    state.release().map(|r| r.tag.to_string()).unwrap_or_default()
}

#[tokio::test]
async fn test_check_publishes_ordered_states() {
    if !unzip_available() {
        return;
    }
    let fixture = Fixture::new("1.0.0");
    let updater = fixture.updater(fast_provider());
    let mut rx = updater.subscribe();

    let update = updater.check_once().await.unwrap();
    assert_eq!(update.release.tag.to_string(), "1.2.3");
    assert_eq!(update.asset.name, "MockApp-1.2.3.zip");
    assert_eq!(updater.releases().len(), 3);

    let states = drain(&mut rx);
    assert!(states.len() >= 3);
    assert!(matches!(states.first(), Some(UpdateState::NewVersionDetected { .. })));
    assert!(matches!(states.last(), Some(UpdateState::Downloaded { .. })));
    let downloading = &states[1..states.len() - 1];
    assert_eq!(downloading.len(), 3);
    assert!(downloading
        .iter()
        .all(|s| matches!(s, UpdateState::Downloading { .. })));
    assert!(states.iter().all(|s| tag_of(s) == "1.2.3"));

    let bundle = update.bundle.bundle();
    assert_eq!(bundle.version().unwrap().to_string(), "1.2.3");
    assert!(bundle.existing_executable().is_some());
    assert!(updater.state().is_downloaded());
    assert!(updater.last_error().is_none());
}

#[tokio::test]
async fn test_prereleases_when_allowed() {
    if !unzip_available() {
        return;
    }
    let fixture = Fixture::new("1.0.0");
    let updater = fixture.updater_with(fast_provider(), |c| c.allow_prereleases = true);
    let update = updater.check_once().await.unwrap();
    assert_eq!(update.release.tag.to_string(), "2.0.0-beta.1");
}

#[tokio::test]
async fn test_up_to_date_records_benign_error() {
    let fixture = Fixture::new("1.2.3");
    let updater = fixture.updater(fast_provider());
    let mut rx = updater.subscribe();

    let err = updater.check_once().await.unwrap_err();
    assert!(matches!(err, UpdateError::NoValidUpdate));
    assert_eq!(updater.last_error().unwrap().kind, ErrorKind::Benign);
    assert_eq!(updater.releases().len(), 3);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_tar_asset_from_feed_file() {
    if which::which("tar").is_err() {
        return;
    }
    let fixture = Fixture::new("1.0.0");
    let feed = fixture.apps.join("feed.json");
    fs::write(
        &feed,
        r#"[{
            "tag_name": "v1.5.0",
            "prerelease": false,
            "assets": [{
                "name": "MockApp-1.5.0.tar.tar",
                "browser_download_url": "https://example.com/MockApp-1.5.0.tar.tar",
                "content_type": "application/x-gzip"
            }]
        }]"#,
    )
    .unwrap();

    let provider = MockReleaseProvider::new(MockSource::File(feed))
        .with_steps(1)
        .with_step_delay(Duration::from_millis(1));
    let update = fixture.updater(provider).check_once().await.unwrap();
    assert_eq!(update.bundle.bundle().version().unwrap().to_string(), "1.5.0");
}

#[tokio::test]
async fn test_signing_mismatch_is_trust_error_and_discards_download() {
    if !unzip_available() {
        return;
    }
    let fixture = Fixture::new("1.0.0");
    let script = fixture.apps.join("codesign.sh");
    fs::write(
        &script,
        r#"case "$2" in
  *.appupdater-*) echo "Authority=Developer ID Application: Someone Else" >&2 ;;
  *) echo "Authority=Developer ID Application: Example Corp" >&2 ;;
esac
"#,
    )
    .unwrap();

    let updater = fixture
        .updater_with(fast_provider(), |config| config.skip_signing_validation = false)
        .with_signing_inspector(SigningInspector::with_command(
            "/bin/sh",
            [script.into_os_string(), "-dvvv".into()],
        ));

    let err = updater.check_once().await.unwrap_err();
    assert!(matches!(err, UpdateError::CodeSigningIdentity));
    assert_eq!(updater.last_error().unwrap().kind, ErrorKind::Trust);
    assert!(matches!(updater.state(), UpdateState::Downloading { .. }));
    assert!(fixture.work_dirs().is_empty());
}

#[tokio::test]
async fn test_install_replaces_bundle_and_terminates() {
    if !unzip_available() {
        return;
    }
    let fixture = Fixture::new("1.0.0");
    let updater = fixture.updater(fast_provider());
    let update = updater.check_once().await.unwrap();

    updater.install(&update.bundle).await.unwrap();

    assert_eq!(fixture.installed_version(), "1.2.3");
    let backup = fixture.apps.join(".MockApp.app.backup");
    assert_eq!(
        AppBundle::load(&backup).unwrap().version().unwrap().to_string(),
        "1.0.0"
    );
    assert!(fixture.terminated.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_install_removes_work_directory_before_terminating() {
    if !unzip_available() {
        return;
    }
    let fixture = Fixture::new("1.0.0");
    let apps = fixture.apps.clone();
    let at_exit = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&at_exit);
    let updater = fixture
        .updater(fast_provider())
        .with_terminate_hook(move || *seen.lock().unwrap() = Some(work_dirs_in(&apps)));

    let update = updater.check_once().await.unwrap();
    assert_eq!(fixture.work_dirs().len(), 1);

    updater.install(&update.bundle).await.unwrap();

    assert_eq!(*at_exit.lock().unwrap(), Some(Vec::new()));
    assert_eq!(updater.state(), UpdateState::None);
    assert_eq!(fixture.installed_version(), "1.2.3");
}

#[tokio::test]
async fn test_failed_relaunch_keeps_process_alive() {
    if !unzip_available() {
        return;
    }
    let fixture = Fixture::new("1.0.0");
    let updater = fixture.updater(fast_provider());
    let update = updater.check_once().await.unwrap();
    fs::write(
        update.bundle.path().join("Contents/MacOS/MockApp"),
        "#!/bin/sh\nexit 1\n",
    )
    .unwrap();

    let err = updater.install(&update.bundle).await.unwrap_err();
    assert!(matches!(err, UpdateError::RelaunchFailed(_)));
    assert_eq!(err.kind(), ErrorKind::InstallTime);
    assert!(!fixture.terminated.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_deferred_update_round_trip() {
    if !unzip_available() {
        return;
    }
    let fixture = Fixture::new("1.0.0");
    let data = tempdir().unwrap();
    let store = PendingUpdates::with_dir(data.path().join("com.example.mockapp/PendingUpdates"));

    let updater = fixture.updater(fast_provider());
    let update = updater.check_once().await.unwrap();
    let record = updater.defer(&update, &store).unwrap();
    drop(update);
    drop(updater);

    let loaded = store.load().unwrap().unwrap();
    assert_eq!(loaded, record);
    assert_eq!(loaded.release_version, "1.2.3");
    assert!(loaded.load_bundle().is_some());

    let later = fixture.updater(fast_provider());
    later.install_deferred(&store).await.unwrap();

    assert_eq!(fixture.installed_version(), "1.2.3");
    assert!(store.load().unwrap().is_none());
    assert!(fixture.terminated.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_concurrent_checks_are_serialized() {
    if !unzip_available() {
        return;
    }
    let fixture = Fixture::new("1.0.0");
    let updater = fixture.updater(fast_provider());
    let mut rx = updater.subscribe();

    let (first, second) = tokio::join!(updater.check_once(), updater.check_once());
    assert!(first.is_ok());
    assert!(second.is_ok());

    let labels: Vec<&str> = drain(&mut rx).iter().map(|s| s.label()).collect();
    let cycle = [
        "new_version_detected",
        "downloading",
        "downloading",
        "downloading",
        "downloaded",
    ];
    assert_eq!(labels, [cycle, cycle].concat());
}

#[tokio::test]
async fn test_aborted_check_cleans_up() {
    let fixture = Fixture::new("1.0.0");
    let slow = MockReleaseProvider::default()
        .with_steps(100)
        .with_step_delay(Duration::from_millis(50));
    let updater = Arc::new(fixture.updater(slow));
    let mut rx = updater.subscribe();

    let handle = updater.spawn_check();
    loop {
        match rx.recv().await {
            Some(UpdateState::Downloading { .. }) => break,
            Some(_) => continue,
            None => panic!("publisher closed"),
        }
    }
    assert_eq!(fixture.work_dirs().len(), 1);

    handle.abort();
    let joined = handle.await;
    assert!(joined.unwrap_err().is_cancelled());

    assert!(fixture.work_dirs().is_empty());
    assert!(!updater.state().is_downloaded());
    assert_eq!(fixture.installed_version(), "1.0.0");
}

#[test]
fn test_fixture_paths() {
    let fixture = Fixture::new("1.0.0");
    assert!(fixture.installed.path().starts_with(&fixture.apps));
    assert!(Path::new(fixture.installed.path()).join("Contents/Info.plist").exists());
}
