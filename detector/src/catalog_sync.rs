/// Keeps the game catalog in sync with its remote copy.
///
/// The remote file is only downloaded when its `Last-Modified` header is newer
/// than the local cache. Any network or parse failure leaves the current
/// snapshot in place; detection never waits on this module.
use chrono::{DateTime, Utc};
use reqwest::header::LAST_MODIFIED;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogHandle, GameCatalog};
use crate::error::Result;

pub struct CatalogSync {
    client: reqwest::Client,
    url: Option<String>,
    cache_path: PathBuf,
    handle: CatalogHandle,
}

impl CatalogSync {
    pub fn new(
        url: Option<String>,
        cache_path: PathBuf,
        timeout: Duration,
        handle: CatalogHandle,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("game-detector/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url,
            cache_path,
            handle,
        })
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Loads the cached catalog into the handle. Returns `Ok(false)` when no
    /// cache file exists yet.
    pub fn load_cache(&self) -> Result<bool> {
        match load_cached(&self.cache_path)? {
            Some(catalog) => {
                info!(entries = catalog.len(), path = %self.cache_path.display(), "loaded cached catalog");
                self.handle.replace(catalog);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Downloads and installs the remote catalog if it is newer than the
    /// cache. Returns whether a new catalog was installed.
    pub async fn refresh_if_stale(&self) -> Result<bool> {
        let Some(url) = self.url.as_deref() else {
            return Ok(false);
        };

        let head = self.client.head(url).send().await?.error_for_status()?;
        let remote_modified = head
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_last_modified);
        let local_modified = cache_modified(&self.cache_path).await;

        if !needs_download(remote_modified, local_modified) {
            debug!(?remote_modified, ?local_modified, "catalog cache is current");
            return Ok(false);
        }

        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        // Parse before touching the cache so a bad download never replaces a good file.
        let catalog = GameCatalog::from_json(&body)?;
        write_cache(&self.cache_path, &body).await?;

        info!(entries = catalog.len(), "installed refreshed catalog");
        self.handle.replace(catalog);
        Ok(true)
    }

    /// Refreshes immediately, then every `interval` until `stop` flips.
    pub async fn run(self, interval: Duration, mut stop: watch::Receiver<bool>) {
        loop {
            if let Err(err) = self.refresh_if_stale().await {
                warn!(%err, "catalog refresh failed; keeping current catalog");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                res = stop.changed() => {
                    if res.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("catalog refresher stopped");
    }
}

/// Reads and parses the cache file, returning `None` if it does not exist.
pub fn load_cached(path: &Path) -> Result<Option<GameCatalog>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(GameCatalog::from_json(&text)?))
}

/// Parses an HTTP `Last-Modified` value (`Wed, 21 Oct 2015 07:28:00 GMT`).
pub fn parse_last_modified(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// A download is needed when there is no cache, or when the remote copy is
/// strictly newer. A remote without a timestamp never overrides a cache.
pub fn needs_download(remote: Option<DateTime<Utc>>, local: Option<DateTime<Utc>>) -> bool {
    match (remote, local) {
        (_, None) => true,
        (Some(remote), Some(local)) => remote > local,
        (None, Some(_)) => false,
    }
}

async fn cache_modified(path: &Path) -> Option<DateTime<Utc>> {
    let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Writes via a sibling temp file and rename so readers never see a torn file.
async fn write_cache(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
