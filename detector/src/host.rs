/// Interfaces the detector consumes from the process that embeds it.
///
/// The recording controller owns the actual capture session; the detector only
/// asks whether one is active and requests start/stop. The settings source
/// owns the user-managed allow and deny lists.
use serde::{Deserialize, Serialize};

use crate::catalog::normalize_path;

/// A user-managed list entry, matched by case-insensitive exact path equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    /// Display name chosen by the user (used as the game name when allow-listed).
    #[serde(default)]
    pub name: String,
    /// Absolute path of the executable.
    pub exact_path: String,
}

pub type AllowListEntry = ListEntry;
pub type DenyListEntry = ListEntry;

impl ListEntry {
    pub fn new(name: impl Into<String>, exact_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exact_path: exact_path.into(),
        }
    }

    /// Case-insensitive exact path comparison. Separators are normalised so
    /// `C:\Games\x.exe` and `C:/Games/x.exe` are the same entry.
    pub fn matches(&self, exe_path: &str) -> bool {
        normalize_path(self.exact_path.trim()) == normalize_path(exe_path.trim())
    }
}

/// The recording subsystem, as seen by the detector.
pub trait RecordingController: Send + Sync {
    fn is_recording_active(&self) -> bool;
    fn is_pre_recording_active(&self) -> bool;
    /// File name of the executable the active recording is tracking, if any.
    fn tracked_file_name(&self) -> Option<String>;
    /// Requests a new recording. Returns `false` if the controller refused or failed.
    fn start(&self, game_name: &str, exe_path: &str) -> bool;
    fn stop(&self);
}

/// Source of the user's allow and deny lists.
pub trait SettingsSource: Send + Sync {
    fn allow_list(&self) -> Vec<AllowListEntry>;
    fn deny_list(&self) -> Vec<DenyListEntry>;
}
