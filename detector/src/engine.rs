/// The detection engine: owns the monitors and funnels every notification
/// through one consumer.
///
/// ```text
///  sysinfo snapshot ─┐
///  WinEvent hook ────┼─▶ mpsc<DetectorEvent> ─▶ consumer ─▶ decide ─▶ TriggerCoordinator
///  poll timer ───────┘
/// ```
///
/// Handlers never return errors; a failure while evaluating one candidate is
/// logged and the next event is processed normally.
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::catalog::{self, CatalogHandle};
use crate::catalog_sync::CatalogSync;
use crate::config::{self, DetectorConfig};
use crate::decision::{self, DecisionInput, Verdict};
use crate::error::{Error, Result};
use crate::event::{DetectorEvent, ProcessCandidate};
use crate::foreground::{ForegroundListener, PlatformListener};
use crate::host::{RecordingController, SettingsSource};
use crate::path_resolver;
use crate::platform::SystemProbe;
use crate::process_monitor::ProcessMonitor;
use crate::settings::FileSettings;
use crate::state::DetectorState;
use crate::status::{write_status, Detection, DetectorRunState, DetectorStatus};
use crate::trigger::TriggerCoordinator;

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct Engine {
    shared: Arc<Shared>,
    config: DetectorConfig,
    config_watch: Option<(PathBuf, Arc<FileSettings>)>,
    running: Mutex<Option<Running>>,
}

/// State reachable from the consumer task.
struct Shared {
    state: DetectorState,
    catalog: CatalogHandle,
    settings: Arc<dyn SettingsSource>,
    probe: Arc<dyn SystemProbe>,
    trigger: TriggerCoordinator,
    status: Mutex<DetectorStatus>,
    status_file: Option<PathBuf>,
    own_pid: u32,
}

/// Everything `stop` has to tear down.
struct Running {
    stop_tx: watch::Sender<bool>,
    monitor: ProcessMonitor,
    listener: ForegroundListener,
    tasks: Vec<JoinHandle<()>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Engine {
    pub fn new(
        config: DetectorConfig,
        controller: Arc<dyn RecordingController>,
        settings: Arc<dyn SettingsSource>,
        probe: Arc<dyn SystemProbe>,
    ) -> Self {
        let shared = Shared {
            state: DetectorState::new(),
            catalog: CatalogHandle::default(),
            settings,
            probe,
            trigger: TriggerCoordinator::new(controller),
            status: Mutex::new(DetectorStatus::new()),
            status_file: config.status_file.clone(),
            own_pid: std::process::id(),
        };
        Self {
            shared: Arc::new(shared),
            config,
            config_watch: None,
            running: Mutex::new(None),
        }
    }

    /// Reloads the allow/deny lists in `settings` whenever `path` changes
    /// while the engine runs.
    pub fn with_config_watch(mut self, path: PathBuf, settings: Arc<FileSettings>) -> Self {
        self.config_watch = Some((path, settings));
        self
    }

    /// Starts all monitors. Must be called inside a tokio runtime.
    ///
    /// A foreground hook that cannot be installed is logged and detection
    /// continues with the process monitor and the fallback poll.
    pub fn start(&self) -> Result<()> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::NoRuntime);
        }
        let mut slot = lock(&self.running);
        if slot.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let poll_in_flight = Arc::new(AtomicBool::new(false));
        let mut tasks = Vec::new();

        // ── Catalog ───────────────────────────────────────────────────────────
        if let Some(sync) = self.catalog_sync() {
            if let Err(err) = sync.load_cache() {
                warn!(%err, path = %sync.cache_path().display(), "failed to load cached catalog");
            }
            tasks.push(tokio::spawn(
                sync.run(self.config.catalog.refresh_interval(), stop_rx.clone()),
            ));
        }

        // ── Settings reload ───────────────────────────────────────────────────
        if let Some((path, settings)) = &self.config_watch {
            tasks.push(tokio::spawn(config::watch_config(
                path.clone(),
                Arc::clone(settings),
                stop_rx.clone(),
            )));
        }

        // ── Monitors ──────────────────────────────────────────────────────────
        let mut monitor = ProcessMonitor::new();
        monitor.start(self.config.monitor.timing(), tx.clone(), Arc::clone(&poll_in_flight));

        let mut listener = ForegroundListener::new(tx, self.config.monitor.hook_join_timeout());
        let hook = match listener.start() {
            Ok(()) => true,
            Err(err) => {
                error!(%err, "foreground hook unavailable; relying on the fallback poll");
                false
            }
        };

        tasks.push(tokio::spawn(consume(
            Arc::clone(&self.shared),
            rx,
            poll_in_flight,
            stop_rx,
        )));

        *slot = Some(Running {
            stop_tx,
            monitor,
            listener,
            tasks,
        });
        drop(slot);

        self.shared.update_status(|status| {
            status.state = DetectorRunState::Running;
            status.foreground_hook = hook;
        });
        info!(foreground_hook = hook, "detector started");
        Ok(())
    }

    /// Stops all monitors and waits for their tasks. Safe to call when stopped.
    pub async fn stop(&self) {
        let Some(running) = self.take_running() else {
            return;
        };
        let Running {
            stop_tx,
            mut monitor,
            mut listener,
            tasks,
        } = running;

        let _ = stop_tx.send(true);

        // Bounded by the hook join timeout; kept off the async workers.
        if let Err(err) = tokio::task::spawn_blocking(move || listener.stop()).await {
            warn!(%err, "foreground listener shutdown panicked");
        }
        monitor.stop().await;
        for task in tasks {
            if let Err(err) = task.await {
                warn!(%err, "detector task ended abnormally");
            }
        }

        self.shared.update_status(|status| {
            status.state = DetectorRunState::Stopped;
            status.foreground_hook = false;
        });
        info!("detector stopped");
    }

    fn take_running(&self) -> Option<Running> {
        lock(&self.running).take()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    fn catalog_sync(&self) -> Option<CatalogSync> {
        let catalog = &self.config.catalog;
        let Some(cache_path) = catalog.cache_path() else {
            warn!("no location for the catalog cache; catalog refresh disabled");
            return None;
        };
        match CatalogSync::new(
            catalog.url.clone(),
            cache_path,
            catalog.request_timeout(),
            self.shared.catalog.clone(),
        ) {
            Ok(sync) => Some(sync),
            Err(err) => {
                warn!(%err, "failed to create catalog client; catalog refresh disabled");
                None
            }
        }
    }

    /// Handles one event synchronously, exactly as the consumer task does.
    pub fn dispatch(&self, event: DetectorEvent) {
        self.shared.dispatch(event);
    }

    /// Runs the decision rules against `exe_path` with the current lists and
    /// catalog, without triggering anything.
    pub fn evaluate_path(&self, exe_path: &str) -> Verdict {
        self.shared.decide(exe_path)
    }

    /// The `PreventRetryRecording` flag.
    pub fn prevent_retry(&self) -> bool {
        self.shared.state.prevent_retry()
    }

    pub fn set_prevent_retry(&self, value: bool) {
        self.shared.state.set_prevent_retry(value);
    }

    /// Handle to the live catalog. Hosts may install a catalog directly.
    pub fn catalog(&self) -> CatalogHandle {
        self.shared.catalog.clone()
    }

    pub fn status(&self) -> DetectorStatus {
        let mut status = lock(&self.shared.status).clone();
        status.catalog_entries = self.shared.catalog.snapshot().len();
        status
    }
}

/// Single consumer: handlers run one at a time on the blocking pool, since
/// they may read files and call into the recording controller.
async fn consume(
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<DetectorEvent>,
    poll_in_flight: Arc<AtomicBool>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
            res = stop.changed() => {
                if res.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
        };

        let is_poll = event == DetectorEvent::ForegroundPoll;
        let worker = Arc::clone(&shared);
        if let Err(err) = tokio::task::spawn_blocking(move || worker.dispatch(event)).await {
            error!(%err, "detector event handler panicked");
        }
        if is_poll {
            poll_in_flight.store(false, Ordering::Release);
        }
    }
    debug!("detector consumer stopped");
}

impl Shared {
    fn dispatch(&self, event: DetectorEvent) {
        match event {
            DetectorEvent::ProcessStarted { pid, observed_at } => {
                self.on_process_started(pid, observed_at)
            }
            DetectorEvent::ProcessExited { pid, exe_name } => self.on_process_exited(pid, exe_name),
            DetectorEvent::ForegroundChanged { pid } => self.on_foreground_changed(pid),
            DetectorEvent::ForegroundPoll => self.on_foreground_poll(),
        }
    }

    fn on_process_started(&self, pid: u32, observed_at: DateTime<Utc>) {
        if pid == self.own_pid {
            return;
        }
        if self.state.prevent_retry() {
            trace!(pid, "retry suppressed; ignoring new process");
            return;
        }
        if self.trigger.recording_active() {
            return;
        }
        if let Some(candidate) = self.candidate(pid, observed_at) {
            self.evaluate(&candidate, "process");
        }
    }

    fn on_process_exited(&self, pid: u32, exe_name: Option<String>) {
        let controller = self.trigger.controller();
        let Some(tracked) = controller.tracked_file_name() else {
            return;
        };
        let Some(exited) = exe_name.or_else(|| self.probe.exe_path(pid)) else {
            return;
        };
        if same_file_name(&tracked, &exited) {
            info!(pid, exe = %exited, "tracked game exited; stopping recording");
            controller.stop();
        }
    }

    fn on_foreground_changed(&self, pid: u32) {
        if self.state.clear_prevent_retry() {
            debug!(pid, "focus changed; retry suppression cleared");
        }
        if pid == 0 || pid == self.own_pid {
            return;
        }
        if self.trigger.recording_active() {
            return;
        }
        if let Some(candidate) = self.candidate(pid, Utc::now()) {
            self.evaluate(&candidate, "foreground");
        }
    }

    fn on_foreground_poll(&self) {
        if self.state.prevent_retry() {
            trace!("retry suppressed; skipping foreground poll");
            return;
        }
        if self.trigger.recording_active() {
            return;
        }
        let Some(pid) = self.probe.foreground_pid() else {
            trace!("no foreground process");
            return;
        };
        if pid == self.own_pid {
            return;
        }
        if let Some(candidate) = self.candidate(pid, Utc::now()) {
            self.evaluate(&candidate, "poll");
        }
    }

    /// Resolves `pid`; an exited process or an unmappable device path is
    /// not a candidate.
    fn candidate(&self, pid: u32, observed_at: DateTime<Utc>) -> Option<ProcessCandidate> {
        let Some(exe_path) = self.probe.exe_path(pid) else {
            debug!(pid, "could not resolve executable path");
            return None;
        };
        if path_resolver::is_device_path(&exe_path) {
            debug!(pid, path = %exe_path, "device path has no drive mapping; skipping");
            return None;
        }
        Some(ProcessCandidate {
            pid,
            exe_path,
            observed_at,
        })
    }

    fn decide(&self, exe_path: &str) -> Verdict {
        let catalog = self.catalog.snapshot();
        let allow = self.settings.allow_list();
        let deny = self.settings.deny_list();
        let input = DecisionInput {
            allow: &allow,
            deny: &deny,
            catalog: &catalog,
            recording_active: self.trigger.recording_active(),
        };
        decision::decide(exe_path, &input, self.probe.as_ref())
    }

    fn evaluate(&self, candidate: &ProcessCandidate, source: &'static str) {
        let verdict = self.decide(&candidate.exe_path);
        if !verdict.should_record {
            debug!(
                pid = candidate.pid,
                path = %candidate.exe_path,
                reason = %verdict.reason,
                source,
                "not recording"
            );
            return;
        }

        let game = verdict
            .resolved_game_name
            .unwrap_or_else(|| decision::resolve_game_name(&candidate.exe_path));
        info!(
            pid = candidate.pid,
            game = %game,
            path = %candidate.exe_path,
            reason = %verdict.reason,
            source,
            latency_ms = (Utc::now() - candidate.observed_at).num_milliseconds(),
            "game detected"
        );
        self.update_status(|status| {
            status.last_detection = Some(Detection {
                game: game.clone(),
                exe_path: candidate.exe_path.clone(),
                reason: reason_key(verdict.reason),
                at: candidate.observed_at.to_rfc3339(),
            });
        });

        self.trigger.try_start(&game, &candidate.exe_path);
    }

    fn update_status(&self, apply: impl FnOnce(&mut DetectorStatus)) {
        let snapshot = {
            let mut status = lock(&self.status);
            apply(&mut status);
            status.catalog_entries = self.catalog.snapshot().len();
            status.clone()
        };
        if let Some(path) = &self.status_file {
            write_status(path, &snapshot);
        }
    }
}

/// Serialized (`snake_case`) name of a reason.
fn reason_key(reason: decision::Reason) -> String {
    serde_json::to_value(reason)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| reason.to_string())
}

/// Case-insensitive comparison of the final path segments. Either side may be
/// a bare file name or a full path.
fn same_file_name(a: &str, b: &str) -> bool {
    let a = catalog::normalize_path(a.trim());
    let b = catalog::normalize_path(b.trim());
    let a = catalog::file_name(&a);
    !a.is_empty() && a == catalog::file_name(&b)
}
