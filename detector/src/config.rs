use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::host::{AllowListEntry, DenyListEntry};
use crate::paths;
use crate::process_monitor::MonitorTiming;
use crate::settings::FileSettings;

pub const DEFAULT_PROCESS_POLL_MILLIS: u64 = 1000;
pub const DEFAULT_FOREGROUND_POLL_SECS: u64 = 10;
pub const DEFAULT_HOOK_JOIN_TIMEOUT_MILLIS: u64 = 2000;
/// Six hours.
pub const DEFAULT_CATALOG_REFRESH_SECS: u64 = 6 * 60 * 60;
pub const DEFAULT_CATALOG_TIMEOUT_SECS: u64 = 15;
const MIN_PROCESS_POLL_MILLIS: u64 = 100;
const MIN_FOREGROUND_POLL_SECS: u64 = 1;
const MIN_CATALOG_REFRESH_SECS: u64 = 60;

/// Root configuration structure, deserialized from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectorConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Executables that are always recorded.
    #[serde(default)]
    pub allow: Vec<AllowListEntry>,
    /// Executables that are never recorded unless also allow-listed.
    #[serde(default)]
    pub deny: Vec<DenyListEntry>,
    /// Where to write the status snapshot. Unset disables the file.
    #[serde(default)]
    pub status_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Period of the process-list snapshot. Clamped to at least 100 ms.
    #[serde(default = "default_process_poll")]
    pub process_poll_millis: u64,
    /// Period of the foreground fallback poll. Clamped to at least 1 s.
    #[serde(default = "default_foreground_poll")]
    pub foreground_poll_secs: u64,
    /// How long `stop` waits for the hook thread before abandoning it.
    #[serde(default = "default_hook_join_timeout")]
    pub hook_join_timeout_millis: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            process_poll_millis: DEFAULT_PROCESS_POLL_MILLIS,
            foreground_poll_secs: DEFAULT_FOREGROUND_POLL_SECS,
            hook_join_timeout_millis: DEFAULT_HOOK_JOIN_TIMEOUT_MILLIS,
        }
    }
}

impl MonitorConfig {
    pub fn timing(&self) -> MonitorTiming {
        MonitorTiming {
            process_poll: Duration::from_millis(self.process_poll_millis.max(MIN_PROCESS_POLL_MILLIS)),
            foreground_poll: Duration::from_secs(self.foreground_poll_secs.max(MIN_FOREGROUND_POLL_SECS)),
        }
    }

    pub fn hook_join_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_join_timeout_millis)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Remote catalog location. When unset only the local cache is used.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_catalog_refresh")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_catalog_timeout")]
    pub request_timeout_secs: u64,
    /// Overrides the default cache location in the app data directory.
    #[serde(default)]
    pub cache_file: Option<PathBuf>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: None,
            refresh_interval_secs: DEFAULT_CATALOG_REFRESH_SECS,
            request_timeout_secs: DEFAULT_CATALOG_TIMEOUT_SECS,
            cache_file: None,
        }
    }
}

impl CatalogConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(MIN_CATALOG_REFRESH_SECS))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The configured cache file, else `games.json` in the app data directory.
    pub fn cache_path(&self) -> Option<PathBuf> {
        self.cache_file.clone().or_else(paths::catalog_cache_path)
    }
}

/// Loads the config file at `path`, returning `DetectorConfig::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<DetectorConfig> {
    if !path.exists() {
        return Ok(DetectorConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Watches the parent directory of `path`. Whenever the config file is
/// created or modified, reloads it and swaps the allow/deny lists held by
/// `settings`. Runs until `stop` flips.
pub async fn watch_config(path: PathBuf, settings: Arc<FileSettings>, mut stop: watch::Receiver<bool>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(err) => {
            warn!(%err, "failed to create config watcher");
            return;
        }
    };

    // Watch the directory so editor-style atomic saves (write-new + rename) are seen.
    let Some(watch_dir) = path.parent().map(Path::to_path_buf) else {
        warn!(path = %path.display(), "config path has no parent directory");
        return;
    };

    if let Err(err) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        warn!(%err, dir = %watch_dir.display(), "failed to watch config directory");
        return;
    }
    debug!(path = %path.display(), "watching config");

    loop {
        let event = tokio::select! {
            event = watch_rx.recv() => match event {
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

        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );
        if !(affects_config && is_write) {
            continue;
        }

        match load_or_default(&path) {
            Ok(config) => {
                info!(
                    allow = config.allow.len(),
                    deny = config.deny.len(),
                    "config reloaded"
                );
                settings.replace(config.allow, config.deny);
            }
            Err(err) => warn!(err = format!("{err:#}"), "failed to reload config; keeping previous lists"),
        }
    }
    debug!("config watcher stopped");
}

fn default_process_poll() -> u64 {
    DEFAULT_PROCESS_POLL_MILLIS
}

fn default_foreground_poll() -> u64 {
    DEFAULT_FOREGROUND_POLL_SECS
}

fn default_hook_join_timeout() -> u64 {
    DEFAULT_HOOK_JOIN_TIMEOUT_MILLIS
}

fn default_catalog_refresh() -> u64 {
    DEFAULT_CATALOG_REFRESH_SECS
}

fn default_catalog_timeout() -> u64 {
    DEFAULT_CATALOG_TIMEOUT_SECS
}
