use chrono::{DateTime, Utc};

/// Notifications delivered to the engine's single consumer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorEvent {
    /// A new process appeared in the process list.
    ProcessStarted { pid: u32, observed_at: DateTime<Utc> },
    /// A process disappeared. `exe_name` is the image file name captured
    /// while it was still running.
    ProcessExited { pid: u32, exe_name: Option<String> },
    /// The OS reported a foreground window change to a window owned by `pid`.
    ForegroundChanged { pid: u32 },
    /// Fallback poll tick: sample the current foreground process.
    ForegroundPoll,
}

/// A process under evaluation. Discarded once a verdict is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCandidate {
    pub pid: u32,
    pub exe_path: String,
    pub observed_at: DateTime<Utc>,
}
