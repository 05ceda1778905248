//! Key-value store for the little client state that outlives a process.
//!
//! The session only needs to remember its conversation id between runs.
//! That goes through the [`KeyValueStore`] capability so tests (and callers
//! that don't want anything on disk) can inject an in-memory store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::error::StoreError;
use crate::message::ConversationId;

/// Key under which the conversation id is persisted.
pub const CONVERSATION_ID_KEY: &str = "conversation_id";

/// A string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Volatile store, for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// A store kept as one JSON object in a file.
///
/// The file is read on open and rewritten on every mutation. A missing file
/// starts empty; a corrupt one is logged and replaced on the next write.
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = entries.len(), "Key-value store loaded");
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> BTreeMap<String, String> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return BTreeMap::new(),
        };
        match serde_json::from_str(&content) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable store file");
                BTreeMap::new()
            }
        }
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let io_err = |e: std::io::Error| StoreError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(io_err)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

/// Read the persisted conversation id, generating and saving one on first use.
pub fn load_or_create_conversation_id(
    store: &dyn KeyValueStore,
) -> Result<ConversationId, StoreError> {
    if let Some(existing) = store.get(CONVERSATION_ID_KEY)? {
        if !existing.trim().is_empty() {
            return Ok(ConversationId::from(existing.trim()));
        }
    }
    rotate_conversation_id(store)
}

/// Replace the persisted conversation id with a fresh one.
pub fn rotate_conversation_id(store: &dyn KeyValueStore) -> Result<ConversationId, StoreError> {
    let id = ConversationId::new();
    store.set(CONVERSATION_ID_KEY, id.as_str())?;
    debug!(conversation_id = %id, "Started new conversation");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_roundtrip() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn conversation_id_is_stable_until_rotated() {
        let store = InMemoryStore::new();
        let first = load_or_create_conversation_id(&store).unwrap();
        let again = load_or_create_conversation_id(&store).unwrap();
        assert_eq!(first, again);

        let rotated = rotate_conversation_id(&store).unwrap();
        assert_ne!(first, rotated);
        assert_eq!(load_or_create_conversation_id(&store).unwrap(), rotated);
    }

    #[test]
    fn file_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let id = {
            let store = JsonFileStore::open(&path);
            load_or_create_conversation_id(&store).unwrap()
        };
        let reopened = JsonFileStore::open(&path);
        assert_eq!(load_or_create_conversation_id(&reopened).unwrap(), id);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        let store = JsonFileStore::open(&path);
        assert_eq!(store.get(CONVERSATION_ID_KEY).unwrap(), None);
        store.set("a", "b").unwrap();
        assert_eq!(JsonFileStore::open(&path).get("a").unwrap().as_deref(), Some("b"));
    }
}
