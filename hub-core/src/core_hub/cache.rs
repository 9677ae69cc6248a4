//! Client-local persisted state and the current-hub selection

use super::types::HubId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to access cache file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Key/value storage that survives restarts on the client.
///
/// Methods are synchronous and are called inline from async store actions,
/// so implementations must stay small and local. Anything slower than a
/// local file read belongs behind `tokio::task::spawn_blocking`.
pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
    fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// Process-local cache
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Cache persisted as a JSON object in a single file.
///
/// Each write rewrites the file with blocking `std::fs` calls. The file
/// only holds a handful of small keys.
#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>, CacheError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl LocalCache for FileCache {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.read_all() {
            Ok(entries) => entries.get(key).cloned(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable cache file");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_all().unwrap_or_default();
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_all().unwrap_or_default();
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

/// The persisted current-hub id, scoped to one session
#[derive(Clone)]
pub struct HubSelection {
    cache: Arc<dyn LocalCache>,
    key: String,
}

impl HubSelection {
    pub fn new(cache: Arc<dyn LocalCache>, key: impl Into<String>) -> Self {
        Self {
            cache,
            key: key.into(),
        }
    }

    pub fn load(&self) -> Option<HubId> {
        self.cache.get(&self.key).map(HubId::new)
    }

    /// Persist the selection. A write failure only costs the selection on
    /// the next start, so it is logged and swallowed.
    pub fn store(&self, hub_id: &HubId) {
        if let Err(e) = self.cache.set(&self.key, hub_id.as_str()) {
            warn!(hub_id = %hub_id, error = %e, "Failed to persist current hub");
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.cache.remove(&self.key) {
            warn!(error = %e, "Failed to clear persisted current hub");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_cache() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("k"), None);
        cache.set("k", "v").unwrap();
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        cache.remove("k").unwrap();
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_file_cache_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let cache = FileCache::new(&path);
        cache.set("current_hub_id", "hub-1").unwrap();
        drop(cache);

        let reopened = FileCache::new(&path);
        assert_eq!(reopened.get("current_hub_id").as_deref(), Some("hub-1"));
        reopened.remove("current_hub_id").unwrap();
        assert_eq!(FileCache::new(&path).get("current_hub_id"), None);
    }

    #[test]
    fn test_file_cache_ignores_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{not json").unwrap();

        let cache = FileCache::new(&path);
        assert_eq!(cache.get("k"), None);
        cache.set("k", "v").unwrap();
        assert_eq!(cache.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_hub_selection() {
        let selection = HubSelection::new(Arc::new(MemoryCache::new()), "current_hub_id");
        assert_eq!(selection.load(), None);

        selection.store(&HubId::new("h1"));
        assert_eq!(selection.load(), Some(HubId::new("h1")));

        selection.clear();
        assert_eq!(selection.load(), None);
    }
}
