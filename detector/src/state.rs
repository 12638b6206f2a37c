use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide detection state shared between the monitors and the host UI.
///
/// Owned by the engine and handed out by `Arc`; there are no globals.
#[derive(Debug, Default)]
pub struct DetectorState {
    /// `PreventRetryRecording`: set when an automatic start should not be
    /// retried until the user changes focus.
    prevent_retry: AtomicBool,
}

impl DetectorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prevent_retry(&self) -> bool {
        self.prevent_retry.load(Ordering::Acquire)
    }

    pub fn set_prevent_retry(&self, value: bool) {
        self.prevent_retry.store(value, Ordering::Release);
    }

    /// Clears the flag, returning whether it was set.
    pub fn clear_prevent_retry(&self) -> bool {
        self.prevent_retry.swap(false, Ordering::AcqRel)
    }
}
