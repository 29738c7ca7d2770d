//! Durable key-value persistence.
//!
//! The relay persists two things: the lyrics cache snapshot and the
//! per-handler configuration blobs (plus which handler was active). Both go
//! through the [`KeyValueStore`] seam so the manager and cache never touch
//! the filesystem directly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::playback::HandlerConfig;
use crate::protocol_constants::{
    ACTIVE_HANDLER_STORAGE_KEY, HANDLER_CONFIG_STORAGE_PREFIX, HANDLER_NONE, STORE_FILE,
};

/// Errors raised by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenient Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal synchronous key-value store of JSON values.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<Value>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: Value) -> StoreResult<()>;

    /// Removes `key`. Removing an absent key is a no-op.
    fn remove(&self, key: &str) -> StoreResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON File Store
// ─────────────────────────────────────────────────────────────────────────────

/// Store backed by a single JSON object file.
///
/// The whole document is kept in memory; every mutation rewrites the file
/// atomically (temp file + rename) while holding the lock, so concurrent
/// writers cannot interleave partial documents.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    /// Opens (or lazily creates) `store.json` inside `data_dir`.
    ///
    /// A missing file starts empty. A corrupt file is logged and replaced on
    /// the next write rather than failing startup.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(STORE_FILE);

        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Map<String, Value>>(&contents) {
                Ok(map) => map,
                Err(e) => {
                    log::warn!(
                        "[Store] Ignoring unreadable store at {}: {}",
                        path.display(),
                        e
                    );
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        log::debug!(
            "[Store] Opened {} ({} keys)",
            path.display(),
            entries.len()
        );

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &Map<String, Value>) -> StoreResult<()> {
        let temp_path = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(entries)?;

        // Write to temp file first
        std::fs::write(&temp_path, contents)?;
        // Atomic rename (on most filesystems)
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&entries)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-Memory Store
// ─────────────────────────────────────────────────────────────────────────────

/// Volatile store for tests and runs without a data directory.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Typed view over the store for handler selection and configuration.
pub struct HandlerSettings<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> HandlerSettings<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }

    fn config_key(name: &str) -> String {
        format!("{HANDLER_CONFIG_STORAGE_PREFIX}{name}")
    }

    /// Name of the handler that was active at last shutdown, if any.
    #[must_use]
    pub fn active_handler(&self) -> Option<String> {
        self.store
            .get(ACTIVE_HANDLER_STORAGE_KEY)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|name| name != HANDLER_NONE)
    }

    /// Stored configuration blob for `name`.
    #[must_use]
    pub fn handler_config(&self, name: &str) -> Option<HandlerConfig> {
        self.store
            .get(&Self::config_key(name))
            .map(HandlerConfig::new)
    }

    /// Records a successful activation: persists the blob, then the name.
    pub fn record_activation(&self, name: &str, config: &HandlerConfig) -> StoreResult<()> {
        self.store
            .set(&Self::config_key(name), config.as_value().clone())?;
        self.store
            .set(ACTIVE_HANDLER_STORAGE_KEY, Value::String(name.to_string()))
    }

    /// Records that no handler is active. Stored blobs are kept for later.
    pub fn record_deactivation(&self) -> StoreResult<()> {
        self.store.set(
            ACTIVE_HANDLER_STORAGE_KEY,
            Value::String(HANDLER_NONE.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_file_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = JsonFileStore::open(dir.path()).unwrap();
            store.set("a", json!({"x": 1})).unwrap();
            store.set("b", json!("two")).unwrap();
            store.remove("b").unwrap();
        }

        let reopened = JsonFileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("a"), Some(json!({"x": 1})));
        assert_eq!(reopened.get("b"), None);
        assert!(!dir.path().join("store.json.tmp").exists());
    }

    #[test]
    fn json_file_store_survives_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STORE_FILE), "{not json").unwrap();

        let store = JsonFileStore::open(dir.path()).unwrap();
        assert_eq!(store.get("anything"), None);
        store.set("k", json!(true)).unwrap();

        let reopened = JsonFileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("k"), Some(json!(true)));
    }

    #[test]
    fn handler_settings_track_active_handler() {
        let store = MemoryStore::new();
        let settings = HandlerSettings::new(&store);
        assert_eq!(settings.active_handler(), None);

        let config = HandlerConfig::new(json!({"sp_dc": "cookie"}));
        settings.record_activation("spotify", &config).unwrap();
        assert_eq!(settings.active_handler().as_deref(), Some("spotify"));
        assert_eq!(
            settings.handler_config("spotify").map(|c| c.as_value().clone()),
            Some(json!({"sp_dc": "cookie"}))
        );

        settings.record_deactivation().unwrap();
        assert_eq!(settings.active_handler(), None);
        assert!(settings.handler_config("spotify").is_some());
    }
}
