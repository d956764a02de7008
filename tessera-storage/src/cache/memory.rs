//! In-process LRU cache store.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_core::{Expiry, StoreError, TesseraResult};

use super::traits::CacheStore;

/// Configuration for [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// Capacity before least-recently-used entries are evicted.
    pub max_entries: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Bounded in-memory store with per-entry expiry.
///
/// Not distributed: it never holds entity-kind sets.
pub struct MemoryStore {
    name: String,
    entries: Mutex<LruCache<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>, config: MemoryStoreConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: name.into(),
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> TesseraResult<MutexGuard<'_, LruCache<String, MemoryEntry>>> {
        self.entries.lock().map_err(|_| {
            StoreError::Transaction {
                reason: format!("memory store {} lock poisoned", self.name),
            }
            .into()
        })
    }

    fn read(entries: &mut LruCache<String, MemoryEntry>, key: &str, now: Instant) -> Option<Value> {
        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> TesseraResult<Option<Value>> {
        let mut entries = self.lock()?;
        Ok(Self::read(&mut entries, key, Instant::now()))
    }

    async fn mget(&self, keys: &[String]) -> TesseraResult<Vec<Option<Value>>> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        Ok(keys
            .iter()
            .map(|key| Self::read(&mut entries, key, now))
            .collect())
    }

    async fn set(&self, key: &str, value: &Value, expiry: Expiry) -> TesseraResult<()> {
        self.mset(&[(key.to_string(), value.clone())], expiry).await
    }

    async fn mset(&self, items: &[(String, Value)], expiry: Expiry) -> TesseraResult<()> {
        if !expiry.is_cacheable() {
            return Ok(());
        }
        let expires_at = expiry.as_duration().map(|ttl| Instant::now() + ttl);
        let mut entries = self.lock()?;
        for (key, value) in items {
            entries.put(
                key.clone(),
                MemoryEntry {
                    value: value.clone(),
                    expires_at,
                },
            );
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> TesseraResult<u64> {
        let mut entries = self.lock()?;
        let mut deleted = 0u64;
        for key in keys {
            if entries.pop(key.as_str()).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn close(&self) -> TesseraResult<()> {
        self.lock()?.clear();
        Ok(())
    }
}
