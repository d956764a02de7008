//! Multi-store cache manager.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde_json::Value;
use tessera_core::{TesseraResult, Ttl};
use tracing::warn;

use super::traits::{CacheManager, CacheStore, StoreInfo};

/// Cache manager over an ordered list of stores.
///
/// Reads fall through the stores in order and return the first hit. Writes
/// and deletes go to every store concurrently; each store gets the expiry
/// the `Ttl` resolves to for its own name.
pub struct MultiStoreCacheManager {
    stores: Vec<Arc<dyn CacheStore>>,
}

impl MultiStoreCacheManager {
    pub fn new(stores: Vec<Arc<dyn CacheStore>>) -> Self {
        Self { stores }
    }

    /// Manager over a single store.
    pub fn single(store: Arc<dyn CacheStore>) -> Self {
        Self::new(vec![store])
    }
}

#[async_trait]
impl CacheManager for MultiStoreCacheManager {
    fn stores(&self) -> Vec<StoreInfo> {
        self.stores
            .iter()
            .map(|store| StoreInfo {
                name: store.name().to_string(),
                distributed: store.is_distributed(),
            })
            .collect()
    }

    fn store(&self, name: &str) -> Option<Arc<dyn CacheStore>> {
        self.stores.iter().find(|store| store.name() == name).cloned()
    }

    async fn get(&self, key: &str) -> TesseraResult<Option<Value>> {
        for store in &self.stores {
            if let Some(value) = store.get(key).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    async fn mget(&self, keys: &[String]) -> TesseraResult<Vec<Option<Value>>> {
        let mut values: Vec<Option<Value>> = vec![None; keys.len()];
        for store in &self.stores {
            let pending: Vec<usize> = (0..keys.len()).filter(|&i| values[i].is_none()).collect();
            if pending.is_empty() {
                break;
            }
            let pending_keys: Vec<String> = pending.iter().map(|&i| keys[i].clone()).collect();
            let found = store.mget(&pending_keys).await?;
            for (i, value) in pending.into_iter().zip(found) {
                values[i] = value;
            }
        }
        Ok(values)
    }

    async fn set(&self, key: &str, value: &Value, ttl: &Ttl) -> TesseraResult<()> {
        try_join_all(
            self.stores
                .iter()
                .map(|store| store.set(key, value, ttl.for_store(store.name()))),
        )
        .await
        .map_err(|e| {
            warn!(key = %key, error = %e, "cache write failed");
            e
        })?;
        Ok(())
    }

    async fn mset(&self, entries: &[(String, Value)], ttl: &Ttl) -> TesseraResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        try_join_all(
            self.stores
                .iter()
                .map(|store| store.mset(entries, ttl.for_store(store.name()))),
        )
        .await
        .map_err(|e| {
            warn!(entries = entries.len(), error = %e, "cache batch write failed");
            e
        })?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> TesseraResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let counts = try_join_all(self.stores.iter().map(|store| store.del(keys))).await?;
        Ok(counts.into_iter().max().unwrap_or(0))
    }

    async fn close(&self) -> TesseraResult<()> {
        try_join_all(self.stores.iter().map(|store| store.close())).await?;
        Ok(())
    }
}
