/// Turns an affirmative verdict into a single start request.
///
/// Several sources (process creation, foreground change, fallback poll) can
/// produce a verdict for the same game within milliseconds. Only one of them
/// may reach the recording controller; the rest are dropped quietly.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::host::RecordingController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The controller accepted the start request.
    Started,
    /// A recording or pre-recording was already active.
    AlreadyActive,
    /// Another start attempt was in progress.
    Busy,
    /// The controller refused or failed to start.
    Failed,
}

pub struct TriggerCoordinator {
    controller: Arc<dyn RecordingController>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag on every exit path.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TriggerCoordinator {
    pub fn new(controller: Arc<dyn RecordingController>) -> Self {
        Self {
            controller,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn controller(&self) -> &Arc<dyn RecordingController> {
        &self.controller
    }

    pub fn recording_active(&self) -> bool {
        self.controller.is_recording_active() || self.controller.is_pre_recording_active()
    }

    /// Starts a recording unless one is active or another start is in flight.
    ///
    /// A failed start is not retried here; the suppression flag is left
    /// untouched so a later focus change can try again.
    pub fn try_start(&self, game_name: &str, exe_path: &str) -> TriggerOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(game = game_name, "start already in flight; dropping trigger");
            return TriggerOutcome::Busy;
        }
        let _guard = InFlight(&self.in_flight);

        if self.recording_active() {
            debug!(game = game_name, "recording already active; dropping trigger");
            return TriggerOutcome::AlreadyActive;
        }

        if self.controller.start(game_name, exe_path) {
            info!(game = game_name, path = exe_path, "recording started");
            TriggerOutcome::Started
        } else {
            warn!(game = game_name, path = exe_path, "recording controller failed to start");
            TriggerOutcome::Failed
        }
    }
}
