//! # Key-Value Backends
//!
//! The persistent string map the config store and key manager write to.
//! In the browser this was `localStorage`; here it is a trait with two
//! implementations.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  KeyValueStore Trait                                                    │
//! │  ───────────────────                                                    │
//! │  • get(key)               - Read a value                               │
//! │  • set(key, value)        - Write a value (whole value, never partial) │
//! │  • remove(key)            - Delete a value                             │
//! │  • keys_with_prefix(p)    - Enumerate (used for migration backups)     │
//! │                                                                         │
//! │  ┌───────────────┐  ┌──────────────────────────────┐                   │
//! │  │  MemoryStore  │  │  JsonFileStore               │                   │
//! │  │               │  │                              │                   │
//! │  │ - Tests       │  │ - One JSON object on disk    │                   │
//! │  │ - Ephemeral   │  │ - temp file + rename writes  │                   │
//! │  └───────────────┘  └──────────────────────────────┘                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Persistent string-to-string storage
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Returns whether it existed.
    fn remove(&self, key: &str) -> Result<bool>;

    /// All keys starting with `prefix`, sorted
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Check if a key exists
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// In-memory storage (for development/testing)
#[derive(Debug, Default)]
pub struct MemoryStore {
    memory: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.memory.read().len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.memory.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.memory.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.memory.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.memory.write().remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .memory
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ============================================================================
// FILE-BACKED
// ============================================================================

/// A single JSON object file
///
/// The whole map is cached in memory and every mutation rewrites the file
/// through a sibling temp file and a rename, so a crash mid-write leaves
/// either the old or the new file, never a torn one.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let entries = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|e| {
                Error::StorageReadError(format!("Failed to read {}: {}", path.display(), e))
            })?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw).map_err(|e| {
                    Error::StorageReadError(format!("Corrupt store {}: {}", path.display(), e))
                })?
            }
        } else {
            BTreeMap::new()
        };

        tracing::debug!("Opened key-value store at {} ({} keys)", path.display(), entries.len());

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::StorageWriteError(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");

        fs::write(&tmp, json).map_err(|e| {
            Error::StorageWriteError(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            Error::StorageWriteError(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;

        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write();
        let previous = entries.insert(key.to_string(), value.to_string());

        if let Err(e) = self.persist(&entries) {
            // Keep the cache in line with what is on disk.
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write();
        let Some(previous) = entries.remove(key) else {
            return Ok(false);
        };

        if let Err(e) = self.persist(&entries) {
            entries.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ============================================================================
// FAULT INJECTION (tests)
// ============================================================================

/// Memory store whose writes or removals of chosen keys fail
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FailingStore {
    inner: MemoryStore,
    failing_sets: parking_lot::Mutex<Vec<&'static str>>,
    failing_removes: parking_lot::Mutex<Vec<&'static str>>,
}

#[cfg(test)]
impl FailingStore {
    pub(crate) fn fail_set(&self, key: &'static str) {
        self.failing_sets.lock().push(key);
    }

    pub(crate) fn fail_remove(&self, key: &'static str) {
        self.failing_removes.lock().push(key);
    }
}

#[cfg(test)]
impl KeyValueStore for FailingStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.failing_sets.lock().iter().any(|k| *k == key) {
            return Err(Error::StorageWriteError(format!("{key}: disk full")));
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        if self.failing_removes.lock().iter().any(|k| *k == key) {
            return Err(Error::StorageWriteError(format!("{key}: interrupted")));
        }
        self.inner.remove(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.keys_with_prefix(prefix)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_retrieve_delete() {
        let store = MemoryStore::new();

        store.set("test-key", "test-value").unwrap();
        assert_eq!(store.get("test-key").unwrap().as_deref(), Some("test-value"));

        assert!(store.remove("test-key").unwrap());
        assert!(!store.remove("test-key").unwrap());
        assert!(store.get("test-key").unwrap().is_none());
    }

    #[test]
    fn test_memory_store_prefix_listing() {
        let store = MemoryStore::new();
        store.set("backup_v2", "b").unwrap();
        store.set("backup_v1", "a").unwrap();
        store.set("other", "c").unwrap();

        assert_eq!(
            store.keys_with_prefix("backup_").unwrap(),
            vec!["backup_v1".to_string(), "backup_v2".to_string()]
        );
        assert!(store.contains("other").unwrap());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_file_store_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            store.set("aixs_config", "AIXS_V3:abc").unwrap();
            store.set("aixs_key_salt", "00ff").unwrap();
            store.remove("aixs_key_salt").unwrap();
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("aixs_config").unwrap().as_deref(),
            Some("AIXS_V3:abc")
        );
        assert!(reopened.get("aixs_key_salt").unwrap().is_none());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "not json").unwrap();

        let err = JsonFileStore::open(&path).unwrap_err();
        assert!(matches!(err, Error::StorageReadError(_)));
    }

    #[test]
    fn test_file_store_empty_file_is_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.keys_with_prefix("").unwrap().is_empty());
    }
}
