use chrono::Utc;
use game_detector::catalog::CatalogRecord;
use game_detector::status::DetectorRunState;
use game_detector::{
    DetectorConfig, DetectorEvent, Engine, Error, FileMetadata, FileSettings, GameCatalog,
    ListEntry, Reason, RecordingController, SettingsSource, SystemProbe,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

// Above the Linux pid ceiling, so never the test process itself.
const GAME_PID: u32 = 5_000_001;
const OTHER_PID: u32 = 5_000_002;

#[derive(Debug, Default)]
struct SpyController {
    active: AtomicBool,
    refuse: AtomicBool,
    starts: Mutex<Vec<(String, String)>>,
    tracked: Mutex<Option<String>>,
    stops: AtomicUsize,
}

impl SpyController {
    fn starts(&self) -> Vec<(String, String)> {
        self.starts.lock().unwrap().clone()
    }
}

impl RecordingController for SpyController {
    fn is_recording_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn is_pre_recording_active(&self) -> bool {
        false
    }

    fn tracked_file_name(&self) -> Option<String> {
        self.tracked.lock().unwrap().clone()
    }

    fn start(&self, game_name: &str, exe_path: &str) -> bool {
        self.starts
            .lock()
            .unwrap()
            .push((game_name.to_string(), exe_path.to_string()));
        if self.refuse.load(Ordering::SeqCst) {
            return false;
        }
        self.active.store(true, Ordering::SeqCst);
        let file_name = exe_path.rsplit(['/', '\\']).next().unwrap_or(exe_path);
        *self.tracked.lock().unwrap() = Some(file_name.to_string());
        true
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        *self.tracked.lock().unwrap() = None;
    }
}

#[derive(Debug, Default)]
struct StaticProbe {
    paths: HashMap<u32, String>,
    descriptions: HashMap<String, String>,
    foreground: Arc<Mutex<Option<u32>>>,
    panic_pid: Option<u32>,
    panics: Arc<AtomicUsize>,
}

impl StaticProbe {
    fn with_process(mut self, pid: u32, path: &str) -> Self {
        self.paths.insert(pid, path.to_string());
        self
    }

    fn with_description(mut self, path: &str, description: &str) -> Self {
        self.descriptions
            .insert(path.to_string(), description.to_string());
        self
    }

    fn panicking_for(mut self, pid: u32) -> Self {
        self.panic_pid = Some(pid);
        self
    }
}

impl FileMetadata for StaticProbe {
    fn file_description(&self, exe_path: &str) -> Option<String> {
        self.descriptions.get(exe_path).cloned()
    }
}

impl SystemProbe for StaticProbe {
    fn exe_path(&self, pid: u32) -> Option<String> {
        if self.panic_pid == Some(pid) {
            self.panics.fetch_add(1, Ordering::SeqCst);
            panic!("exe_path lookup failed for pid {pid}");
        }
        self.paths.get(&pid).cloned()
    }

    fn foreground_pid(&self) -> Option<u32> {
        *self.foreground.lock().unwrap()
    }
}

struct Harness {
    engine: Engine,
    controller: Arc<SpyController>,
    settings: Arc<FileSettings>,
}

fn config_in(dir: &Path) -> DetectorConfig {
    let mut config = DetectorConfig::default();
    config.catalog.cache_file = Some(dir.join("games.json"));
    config.status_file = Some(dir.join("status.toml"));
    config.monitor.process_poll_millis = 200;
    config.monitor.foreground_poll_secs = 1;
    config
}

fn harness(config: DetectorConfig, probe: StaticProbe) -> Harness {
    let controller = Arc::new(SpyController::default());
    let settings = Arc::new(FileSettings::default());
    let engine = Engine::new(
        config,
        controller.clone(),
        settings.clone(),
        Arc::new(probe),
    );
    engine.catalog().replace(GameCatalog::from_records([CatalogRecord {
        name: "Foo Game".to_string(),
        executables: vec!["foo.exe".to_string()],
    }]));
    Harness {
        engine,
        controller,
        settings,
    }
}

fn started(pid: u32) -> DetectorEvent {
    DetectorEvent::ProcessStarted {
        pid,
        observed_at: Utc::now(),
    }
}

#[test]
fn catalog_game_start_triggers_recording() {
    let dir = tempdir().unwrap();
    let h = harness(
        config_in(dir.path()),
        StaticProbe::default().with_process(GAME_PID, "C:/Games/Foo/foo.exe"),
    );

    h.engine.dispatch(started(GAME_PID));

    assert_eq!(
        h.controller.starts(),
        vec![("Foo Game".to_string(), "C:/Games/Foo/foo.exe".to_string())]
    );
    let detection = h.engine.status().last_detection.unwrap();
    assert_eq!(detection.game, "Foo Game");
    assert_eq!(detection.reason, "known_game");
}

#[test]
fn wallpaper_engine_is_never_recorded() {
    let dir = tempdir().unwrap();
    let path = "C:/Program Files/Steam/steamapps/common/wallpaper_engine/wallpaper64.exe";
    let h = harness(
        config_in(dir.path()),
        StaticProbe::default().with_process(GAME_PID, path),
    );

    h.engine.dispatch(started(GAME_PID));

    assert!(h.controller.starts().is_empty());
    assert_eq!(h.engine.evaluate_path(path).reason, Reason::BlockedPath);
}

#[test]
fn steam_library_game_without_manifest_uses_file_stem() {
    let dir = tempdir().unwrap();
    let path = dir
        .path()
        .join("steamapps/common/Bar/bar.exe")
        .to_string_lossy()
        .into_owned();
    let h = harness(
        config_in(dir.path()),
        StaticProbe::default().with_process(GAME_PID, &path),
    );

    h.engine.dispatch(started(GAME_PID));

    assert_eq!(h.controller.starts(), vec![("bar".to_string(), path)]);
}

#[test]
fn anticheat_description_is_not_recorded() {
    let dir = tempdir().unwrap();
    let path = "C:/Riot Games/vgc.exe";
    let h = harness(
        config_in(dir.path()),
        StaticProbe::default()
            .with_process(GAME_PID, path)
            .with_description(path, "Riot Anticheat Loader"),
    );

    h.engine.dispatch(started(GAME_PID));

    assert!(h.controller.starts().is_empty());
    assert_eq!(h.engine.evaluate_path(path).reason, Reason::AntiCheat);
}

#[test]
fn allow_list_beats_deny_list() {
    let dir = tempdir().unwrap();
    let path = r"D:\Tools\thing.exe";
    let h = harness(
        config_in(dir.path()),
        StaticProbe::default().with_process(GAME_PID, path),
    );
    h.settings.replace(
        vec![ListEntry::new("My Thing", path)],
        vec![ListEntry::new("", path)],
    );

    h.engine.dispatch(started(GAME_PID));

    assert_eq!(
        h.controller.starts(),
        vec![("My Thing".to_string(), path.to_string())]
    );
}

#[test]
fn deny_listed_catalog_game_is_not_recorded() {
    let dir = tempdir().unwrap();
    let path = "C:/Games/Foo/foo.exe";
    let h = harness(
        config_in(dir.path()),
        StaticProbe::default().with_process(GAME_PID, path),
    );
    h.settings.replace(Vec::new(), vec![ListEntry::new("", path)]);

    h.engine.dispatch(started(GAME_PID));

    assert!(h.controller.starts().is_empty());
}

#[test]
fn second_trigger_while_recording_is_a_noop() {
    let dir = tempdir().unwrap();
    let h = harness(
        config_in(dir.path()),
        StaticProbe::default()
            .with_process(GAME_PID, "C:/Games/Foo/foo.exe")
            .with_process(OTHER_PID, "C:/Games/Foo/foo.exe"),
    );

    h.engine.dispatch(started(GAME_PID));
    h.engine.dispatch(DetectorEvent::ForegroundChanged { pid: OTHER_PID });
    h.engine.dispatch(started(OTHER_PID));

    assert_eq!(h.controller.starts().len(), 1);
}

#[test]
fn unresolvable_and_device_paths_are_not_candidates() {
    let dir = tempdir().unwrap();
    let h = harness(
        config_in(dir.path()),
        StaticProbe::default()
            .with_process(OTHER_PID, r"\Device\HarddiskVolume9\Games\Foo\foo.exe"),
    );

    h.engine.dispatch(started(GAME_PID));
    h.engine.dispatch(started(OTHER_PID));

    assert!(h.controller.starts().is_empty());
}

#[test]
fn suppression_blocks_automatic_triggers_until_focus_changes() {
    let dir = tempdir().unwrap();
    let probe = StaticProbe::default().with_process(GAME_PID, "C:/Games/Foo/foo.exe");
    *probe.foreground.lock().unwrap() = Some(GAME_PID);
    let h = harness(config_in(dir.path()), probe);

    h.engine.set_prevent_retry(true);
    h.engine.dispatch(started(GAME_PID));
    h.engine.dispatch(DetectorEvent::ForegroundPoll);
    assert!(h.controller.starts().is_empty());
    assert!(h.engine.prevent_retry());

    h.engine.dispatch(DetectorEvent::ForegroundChanged { pid: GAME_PID });
    assert!(!h.engine.prevent_retry());
    assert_eq!(h.controller.starts().len(), 1);
}

#[test]
fn foreground_poll_samples_current_window() {
    let dir = tempdir().unwrap();
    let probe = StaticProbe::default().with_process(GAME_PID, "C:/Games/Foo/foo.exe");
    *probe.foreground.lock().unwrap() = Some(GAME_PID);
    let h = harness(config_in(dir.path()), probe);

    h.engine.dispatch(DetectorEvent::ForegroundPoll);

    assert_eq!(h.controller.starts()[0].0, "Foo Game");
}

#[test]
fn failed_start_is_retried_on_next_focus_change() {
    let dir = tempdir().unwrap();
    let h = harness(
        config_in(dir.path()),
        StaticProbe::default().with_process(GAME_PID, "C:/Games/Foo/foo.exe"),
    );
    h.controller.refuse.store(true, Ordering::SeqCst);

    h.engine.dispatch(DetectorEvent::ForegroundChanged { pid: GAME_PID });
    assert!(!h.engine.prevent_retry());

    h.controller.refuse.store(false, Ordering::SeqCst);
    h.engine.dispatch(DetectorEvent::ForegroundChanged { pid: GAME_PID });

    assert_eq!(h.controller.starts().len(), 2);
    assert!(h.controller.is_recording_active());
}

#[test]
fn tracked_game_exit_stops_recording() {
    let dir = tempdir().unwrap();
    let h = harness(
        config_in(dir.path()),
        StaticProbe::default().with_process(GAME_PID, "C:/Games/Foo/foo.exe"),
    );
    h.engine.dispatch(started(GAME_PID));

    h.engine.dispatch(DetectorEvent::ProcessExited {
        pid: OTHER_PID,
        exe_name: Some("notepad.exe".to_string()),
    });
    assert_eq!(h.controller.stops.load(Ordering::SeqCst), 0);

    h.engine.dispatch(DetectorEvent::ProcessExited {
        pid: GAME_PID,
        exe_name: Some("FOO.EXE".to_string()),
    });
    assert_eq!(h.controller.stops.load(Ordering::SeqCst), 1);
    assert!(!h.controller.is_recording_active());
}

#[test]
fn exit_without_tracked_recording_is_ignored() {
    let dir = tempdir().unwrap();
    let h = harness(config_in(dir.path()), StaticProbe::default());

    h.engine.dispatch(DetectorEvent::ProcessExited {
        pid: GAME_PID,
        exe_name: Some("foo.exe".to_string()),
    });

    assert_eq!(h.controller.stops.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_stop_lifecycle() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path());
    let status_file = config.status_file.clone().unwrap();
    let h = harness(config, StaticProbe::default());

    // Stopping a stopped engine is a no-op.
    h.engine.stop().await;
    assert!(!h.engine.is_running());

    h.engine.start().unwrap();
    assert!(h.engine.is_running());
    assert!(matches!(h.engine.start(), Err(Error::AlreadyRunning)));

    let status = h.engine.status();
    assert_eq!(status.state, DetectorRunState::Running);
    assert_eq!(status.catalog_entries, 1);
    let written = std::fs::read_to_string(&status_file).unwrap();
    assert!(written.contains("state = \"running\""));

    h.engine.stop().await;
    assert!(!h.engine.is_running());
    assert_eq!(h.engine.status().state, DetectorRunState::Stopped);
    assert!(!h.engine.status().foreground_hook);
    h.engine.stop().await;

    let written = std::fs::read_to_string(&status_file).unwrap();
    assert!(written.contains("state = \"stopped\""));

    // The engine can be started again after a stop.
    h.engine.start().unwrap();
    h.engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn running_engine_detects_foreground_game_by_polling() {
    let dir = tempdir().unwrap();
    let probe = StaticProbe::default().with_process(GAME_PID, "C:/Games/Foo/foo.exe");
    *probe.foreground.lock().unwrap() = Some(GAME_PID);
    let h = harness(config_in(dir.path()), probe);

    h.engine.start().unwrap();

    let mut detected = false;
    for _ in 0..50 {
        if !h.controller.starts().is_empty() {
            detected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    h.engine.stop().await;

    assert!(detected, "poll never triggered a recording");
    assert_eq!(h.controller.starts().len(), 1);
    assert_eq!(h.controller.starts()[0].0, "Foo Game");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cached_catalog_is_loaded_on_start() {
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join("games.json"),
        r#"[{"name": "Cached Game", "executables": ["cached.exe"]}, {"name": "Other", "executables": ["other.exe"]}]"#,
    )
    .unwrap();
    let h = harness(config_in(dir.path()), StaticProbe::default());

    h.engine.start().unwrap();
    let verdict = h.engine.evaluate_path("C:/Games/cached.exe");
    h.engine.stop().await;

    assert!(verdict.should_record);
    assert_eq!(verdict.resolved_game_name.as_deref(), Some("Cached Game"));
    assert_eq!(h.engine.status().catalog_entries, 2);
}

#[test]
fn start_outside_runtime_is_an_error() {
    let dir = tempdir().unwrap();
    let h = harness(config_in(dir.path()), StaticProbe::default());

    assert!(matches!(h.engine.start(), Err(Error::NoRuntime)));
    assert!(!h.engine.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_handler_does_not_stop_later_events() {
    let dir = tempdir().unwrap();
    let probe = StaticProbe::default()
        .with_process(GAME_PID, "C:/Games/Foo/foo.exe")
        .panicking_for(OTHER_PID);
    *probe.foreground.lock().unwrap() = Some(OTHER_PID);
    let foreground = Arc::clone(&probe.foreground);
    let panics = Arc::clone(&probe.panics);
    let h = harness(config_in(dir.path()), probe);

    h.engine.start().unwrap();

    for _ in 0..50 {
        if panics.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(panics.load(Ordering::SeqCst) > 0, "poll never reached the failing lookup");
    assert!(h.controller.starts().is_empty());

    *foreground.lock().unwrap() = Some(GAME_PID);
    let mut detected = false;
    for _ in 0..50 {
        if !h.controller.starts().is_empty() {
            detected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    h.engine.stop().await;

    assert!(detected, "consumer stopped after a handler panic");
    assert_eq!(h.controller.starts()[0].0, "Foo Game");
    assert!(h.engine.status().last_detection.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn config_watch_reloads_lists_while_running() {
    let dir = tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let config_path = root.join("config.toml");
    let path = r"D:\Tools\thing.exe";
    let Harness {
        engine,
        controller,
        settings,
    } = harness(
        config_in(&root),
        StaticProbe::default().with_process(GAME_PID, path),
    );
    let engine = engine.with_config_watch(config_path.clone(), Arc::clone(&settings));

    engine.start().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let tmp = root.join("config.toml.tmp");
    std::fs::write(
        &tmp,
        "[[allow]]\nname = \"My Thing\"\nexact_path = 'D:\\Tools\\thing.exe'\n",
    )
    .unwrap();
    std::fs::rename(&tmp, &config_path).unwrap();

    let mut reloaded = false;
    for _ in 0..50 {
        if !settings.allow_list().is_empty() {
            reloaded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(reloaded, "running engine never reloaded the config");

    engine.dispatch(started(GAME_PID));
    engine.stop().await;

    assert_eq!(
        controller.starts(),
        vec![("My Thing".to_string(), path.to_string())]
    );
}
