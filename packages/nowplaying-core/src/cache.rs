//! Generic time-boxed cache with manual sweep and snapshot persistence.
//!
//! Entries carry the wall-clock time they were written. Reads never check
//! expiry; callers compare [`CacheEntry::timestamp`] against
//! [`Cache::expiration`] (or use [`Cache::is_fresh`]). Stale entries are
//! removed only by [`Cache::clean`], which the composition root runs on a
//! schedule together with [`Cache::save`].

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::store::{KeyValueStore, StoreResult};
use crate::utils::now_millis;

/// A cached value stamped with its write time (epoch ms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: u64,
}

/// String-keyed TTL cache.
///
/// All access goes through one `RwLock`, so a sweep never interleaves with a
/// concurrent `set`.
pub struct Cache<T> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    expiration: Duration,
    storage_key: String,
}

impl<T> Cache<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    pub fn new(storage_key: impl Into<String>, expiration: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            expiration,
            storage_key: storage_key.into(),
        }
    }

    /// Configured entry lifetime.
    #[must_use]
    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Stores `value` under `key`, stamped with the current time.
    pub fn set(&self, key: impl Into<String>, value: T) {
        self.insert_entry(
            key,
            CacheEntry {
                data: value,
                timestamp: now_millis(),
            },
        );
    }

    /// Stores a pre-stamped entry.
    pub fn insert_entry(&self, key: impl Into<String>, entry: CacheEntry<T>) {
        self.entries.write().insert(key.into(), entry);
    }

    /// Returns the entry for `key` regardless of age.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        self.entries.read().get(key).cloned()
    }

    /// Returns true when `entry` is within the configured lifetime.
    #[must_use]
    pub fn is_fresh(&self, entry: &CacheEntry<T>) -> bool {
        now_millis().saturating_sub(entry.timestamp) <= self.expiration.as_millis() as u64
    }

    /// Returns the value for `key` only if it has not expired.
    #[must_use]
    pub fn get_fresh(&self, key: &str) -> Option<T> {
        self.get(key)
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| entry.data)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Deletes every expired entry and returns how many were removed.
    pub fn clean(&self) -> usize {
        let now = now_millis();
        let max_age = self.expiration.as_millis() as u64;

        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_sub(entry.timestamp) <= max_age);
        let removed = before - entries.len();
        drop(entries);

        if removed > 0 {
            log::info!(
                "[Cache] Removed {} expired entries from '{}'",
                removed,
                self.storage_key
            );
        }
        removed
    }

    /// Persists all entries as an array of `[key, entry]` pairs.
    pub fn save(&self, store: &dyn KeyValueStore) -> StoreResult<()> {
        let pairs: Vec<(String, CacheEntry<T>)> = self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let count = pairs.len();
        store.set(&self.storage_key, serde_json::to_value(pairs)?)?;
        log::debug!("[Cache] Saved {} entries to '{}'", count, self.storage_key);
        Ok(())
    }

    /// Replaces the in-memory entries with the persisted snapshot.
    ///
    /// A missing or unreadable snapshot leaves the cache empty. Returns the
    /// number of entries loaded.
    pub fn load(&self, store: &dyn KeyValueStore) -> usize {
        let Some(value) = store.get(&self.storage_key) else {
            return 0;
        };

        let pairs: Vec<(String, CacheEntry<T>)> = match serde_json::from_value(value) {
            Ok(pairs) => pairs,
            Err(e) => {
                log::warn!(
                    "[Cache] Discarding unreadable snapshot '{}': {}",
                    self.storage_key,
                    e
                );
                return 0;
            }
        };

        let count = pairs.len();
        *self.entries.write() = pairs.into_iter().collect();
        log::debug!("[Cache] Loaded {} entries from '{}'", count, self.storage_key);
        count
    }
}
