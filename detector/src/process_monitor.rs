use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::event::DetectorEvent;
use crate::foreground;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorTiming {
    /// Period of the process-list snapshot.
    pub process_poll: Duration,
    /// Period of the foreground fallback poll.
    pub foreground_poll: Duration,
}

/// Process creations and terminations between two snapshots.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub started: Vec<u32>,
    pub exited: Vec<(u32, String)>,
}

/// Differential process list: pid → image file name.
///
/// The first update only primes the snapshot, so processes that were already
/// running when monitoring began are never reported as new.
#[derive(Debug, Default)]
pub struct ProcessSnapshot {
    known: HashMap<u32, String>,
    primed: bool,
}

impl ProcessSnapshot {
    pub fn update(&mut self, current: HashMap<u32, String>) -> SnapshotDiff {
        if !self.primed {
            self.known = current;
            self.primed = true;
            return SnapshotDiff::default();
        }

        let mut diff = SnapshotDiff::default();
        for (pid, name) in &current {
            match self.known.get(pid) {
                None => diff.started.push(*pid),
                // Same pid, different image: the pid was recycled between ticks.
                Some(old) if old != name => {
                    diff.exited.push((*pid, old.clone()));
                    diff.started.push(*pid);
                }
                Some(_) => {}
            }
        }
        for (pid, name) in &self.known {
            if !current.contains_key(pid) {
                diff.exited.push((*pid, name.clone()));
            }
        }
        diff.started.sort_unstable();
        diff.exited.sort_unstable();

        self.known = current;
        diff
    }
}

/// Watches process creation and termination by diffing the OS process list,
/// and drives the foreground fallback poll timer.
pub struct ProcessMonitor {
    state: Arc<Mutex<MonitorState>>,
    stop_tx: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMonitor {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MonitorState::Stopped)),
            stop_tx: None,
            handles: Vec::new(),
        }
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: MonitorState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Subscribes to process notifications and starts the foreground poll
    /// timer. Must be called inside a tokio runtime. Returns `false` if the
    /// monitor was not stopped.
    pub fn start(
        &mut self,
        timing: MonitorTiming,
        tx: mpsc::Sender<DetectorEvent>,
        poll_in_flight: Arc<AtomicBool>,
    ) -> bool {
        if self.state() != MonitorState::Stopped {
            warn!(state = ?self.state(), "process monitor already started");
            return false;
        }
        self.set_state(MonitorState::Starting);

        let (stop_tx, stop_rx) = watch::channel(false);
        self.handles.push(tokio::spawn(run(
            timing.process_poll,
            tx.clone(),
            stop_rx.clone(),
        )));
        self.handles.push(tokio::spawn(foreground::run_poll_timer(
            timing.foreground_poll,
            tx,
            poll_in_flight,
            stop_rx,
        )));
        self.stop_tx = Some(stop_tx);

        self.set_state(MonitorState::Running);
        info!(
            process_poll_ms = timing.process_poll.as_millis() as u64,
            foreground_poll_ms = timing.foreground_poll.as_millis() as u64,
            "process monitor started"
        );
        true
    }

    /// Unsubscribes and stops the poll timer. Safe to call when stopped.
    pub async fn stop(&mut self) {
        if self.state() == MonitorState::Stopped {
            return;
        }
        self.set_state(MonitorState::Stopping);

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        for handle in self.handles.drain(..) {
            if let Err(err) = handle.await {
                warn!(%err, "process monitor task ended abnormally");
            }
        }

        self.set_state(MonitorState::Stopped);
        info!("process monitor stopped");
    }
}

fn exe_name(process: &sysinfo::Process) -> String {
    process
        .exe()
        .and_then(|p| p.file_name())
        .unwrap_or_else(|| process.name())
        .to_string_lossy()
        .into_owned()
}

/// Snapshots the process list every `period` and emits start/exit events
/// until `stop` flips or the receiver goes away.
async fn run(period: Duration, tx: mpsc::Sender<DetectorEvent>, mut stop: watch::Receiver<bool>) {
    let mut sys = System::new();
    let mut snapshot = ProcessSnapshot::default();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let refresh = ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            res = stop.changed() => {
                if res.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
        }

        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);
        let current: HashMap<u32, String> = sys
            .processes()
            .iter()
            .map(|(pid, process)| (pid.as_u32(), exe_name(process)))
            .collect();
        trace!(processes = current.len(), "process snapshot");

        let diff = snapshot.update(current);
        let observed_at = chrono::Utc::now();

        let events = diff
            .exited
            .into_iter()
            .map(|(pid, name)| DetectorEvent::ProcessExited {
                pid,
                exe_name: Some(name),
            })
            .chain(
                diff.started
                    .into_iter()
                    .map(|pid| DetectorEvent::ProcessStarted { pid, observed_at }),
            );
        for event in events {
            tokio::select! {
                res = tx.send(event) => {
                    if res.is_err() {
                        debug!("event channel closed; process monitor exiting");
                        return;
                    }
                }
                _ = stop.changed() => {
                    debug!("process snapshot loop stopped while delivering events");
                    return;
                }
            }
        }
    }
    debug!("process snapshot loop stopped");
}
