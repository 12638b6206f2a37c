use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Whether the engine's monitors are running.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum DetectorRunState {
    Stopped,
    Running,
}

/// The most recent affirmative verdict.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Detection {
    pub game: String,
    pub exe_path: String,
    /// Which rule produced the verdict (`known_game`, `steam_library`, ...).
    pub reason: String,
    /// RFC 3339 timestamp.
    pub at: String,
}

/// Snapshot of the detector for the host UI. Optionally mirrored to
/// `status.toml` so an out-of-process UI can read it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorStatus {
    /// Crate version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: DetectorRunState,
    /// `false` when the foreground hook could not be installed and only the
    /// fallback poll is active.
    pub foreground_hook: bool,
    pub catalog_entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_detection: Option<Detection>,
}

impl Default for DetectorStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorStatus {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: DetectorRunState::Stopped,
            foreground_hook: false,
            catalog_entries: 0,
            last_detection: None,
        }
    }
}

/// Serializes `status` to TOML and writes it to `path`, creating the parent
/// directory if needed. Failures are logged, never returned.
pub fn write_status(path: &Path, status: &DetectorStatus) {
    if let Some(parent) = path.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            warn!(%err, dir = %parent.display(), "failed to create status directory");
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(err) = std::fs::write(path, content) {
                warn!(%err, path = %path.display(), "failed to write status file");
            }
        }
        Err(err) => warn!(%err, "failed to serialize status"),
    }
}
