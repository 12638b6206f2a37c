/// In-memory index of known games, built from the remote catalog file.
///
/// A catalog is immutable once built. Refreshes build a new [`GameCatalog`]
/// and swap it into the [`CatalogHandle`] in one step, so readers always see
/// either the old snapshot or the new one.
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

/// One record of the catalog file: `{ "name": ..., "executables": [...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub name: String,
    #[serde(default)]
    pub executables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub canonical_name: String,
    /// Normalised patterns. A pattern containing `/` is a path fragment,
    /// anything else is a bare file name.
    pub executable_patterns: BTreeSet<String>,
}

impl CatalogEntry {
    fn matches(&self, normalized_path: &str, file_name: &str) -> bool {
        self.executable_patterns.iter().any(|pattern| {
            if pattern.contains('/') {
                normalized_path.contains(pattern.as_str())
            } else {
                file_name == pattern
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameCatalog {
    entries: Vec<CatalogEntry>,
}

impl GameCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a catalog from raw records. Records without a name or without
    /// any usable pattern are skipped.
    pub fn from_records(records: impl IntoIterator<Item = CatalogRecord>) -> Self {
        let entries = records
            .into_iter()
            .filter_map(|record| {
                let canonical_name = record.name.trim().to_string();
                if canonical_name.is_empty() {
                    return None;
                }
                let executable_patterns: BTreeSet<String> = record
                    .executables
                    .iter()
                    .map(|p| normalize_path(p.trim()))
                    .filter(|p| !p.is_empty() && p != "/")
                    .collect();
                if executable_patterns.is_empty() {
                    return None;
                }
                Some(CatalogEntry {
                    canonical_name,
                    executable_patterns,
                })
            })
            .collect();
        Self { entries }
    }

    /// Parses the JSON catalog file format.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let records: Vec<CatalogRecord> = serde_json::from_str(text)?;
        Ok(Self::from_records(records))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn is_known_executable(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    pub fn name_for(&self, path: &str) -> Option<&str> {
        self.lookup(path).map(|e| e.canonical_name.as_str())
    }

    /// First matching entry in file order.
    fn lookup(&self, path: &str) -> Option<&CatalogEntry> {
        if path.is_empty() {
            return None;
        }
        let normalized = normalize_path(path);
        let file_name = file_name(&normalized);
        self.entries
            .iter()
            .find(|entry| entry.matches(&normalized, file_name))
    }
}

/// Lower-cases and converts `\` separators to `/`.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").to_lowercase()
}

/// Final segment of a normalised path.
pub fn file_name(normalized: &str) -> &str {
    normalized.rsplit('/').next().unwrap_or(normalized)
}

/// Shared, swappable reference to the current catalog snapshot.
#[derive(Debug, Clone, Default)]
pub struct CatalogHandle {
    current: Arc<RwLock<Arc<GameCatalog>>>,
}

impl CatalogHandle {
    pub fn new(catalog: GameCatalog) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    pub fn snapshot(&self) -> Arc<GameCatalog> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn replace(&self, catalog: GameCatalog) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(catalog);
    }
}
