use std::path::Path;
use std::sync::RwLock;

use crate::config::{self, DetectorConfig};
use crate::host::{AllowListEntry, DenyListEntry, SettingsSource};

/// Allow and deny lists held in memory and seeded from `config.toml`.
///
/// [`config::watch_config`] keeps it current while the engine runs. Readers
/// always see both lists from the same reload.
#[derive(Debug, Default)]
pub struct FileSettings {
    lists: RwLock<Lists>,
}

#[derive(Debug, Default, Clone)]
struct Lists {
    allow: Vec<AllowListEntry>,
    deny: Vec<DenyListEntry>,
}

impl FileSettings {
    pub fn new(allow: Vec<AllowListEntry>, deny: Vec<DenyListEntry>) -> Self {
        Self {
            lists: RwLock::new(Lists { allow, deny }),
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(config.allow.clone(), config.deny.clone())
    }

    pub fn replace(&self, allow: Vec<AllowListEntry>, deny: Vec<DenyListEntry>) {
        *self.lists.write().unwrap_or_else(|e| e.into_inner()) = Lists { allow, deny };
    }

    /// Re-reads `path`; on error the current lists are kept.
    pub fn reload_from(&self, path: &Path) -> anyhow::Result<()> {
        let config = config::load_or_default(path)?;
        self.replace(config.allow, config.deny);
        Ok(())
    }
}

impl SettingsSource for FileSettings {
    fn allow_list(&self) -> Vec<AllowListEntry> {
        self.lists.read().unwrap_or_else(|e| e.into_inner()).allow.clone()
    }

    fn deny_list(&self) -> Vec<DenyListEntry> {
        self.lists.read().unwrap_or_else(|e| e.into_inner()).deny.clone()
    }
}
