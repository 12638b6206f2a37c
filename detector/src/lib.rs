//! Decides, in real time, when a game session is running and asks an
//! embedding host to start or stop recording it.
//!
//! The host supplies a [`RecordingController`] and a [`SettingsSource`],
//! builds an [`Engine`] and calls [`Engine::start`] inside a tokio runtime.

pub mod catalog;
pub mod catalog_sync;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod event;
pub mod foreground;
pub mod host;
pub mod logging;
pub mod path_resolver;
pub mod paths;
pub mod platform;
pub mod process_monitor;
pub mod settings;
pub mod state;
pub mod status;
pub mod steam;
pub mod trigger;

pub use catalog::{CatalogHandle, GameCatalog};
pub use config::DetectorConfig;
pub use decision::{decide, Reason, Verdict};
pub use engine::Engine;
pub use error::{Error, Result};
pub use event::DetectorEvent;
pub use host::{AllowListEntry, DenyListEntry, ListEntry, RecordingController, SettingsSource};
pub use platform::{FileMetadata, NativeProbe, SystemProbe};
pub use settings::FileSettings;
pub use status::DetectorStatus;
