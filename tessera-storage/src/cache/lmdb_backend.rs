//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped,
//! persistent key-value store that survives process restarts.
//!
//! # Value Format
//!
//! `[expires_at: 8 bytes, i64 LE unix millis, 0 = never][json value]`
//!
//! Expired entries are treated as misses on read and removed lazily on the
//! next write to the same key or on `purge_expired`.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `get` and `mget`
//! - Write transactions for `set`, `mset`, `del` and `purge_expired`

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use serde_json::Value;
use tessera_core::{Expiry, StoreError, TesseraError, TesseraResult};

use super::traits::CacheStore;

const HEADER_LEN: usize = 8;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Serialization(reason) => StoreError::Serialization { reason },
            LmdbStoreError::Deserialization(reason) => StoreError::Deserialization { reason },
            other => StoreError::Transaction {
                reason: other.to_string(),
            },
        }
    }
}

impl From<LmdbStoreError> for TesseraError {
    fn from(e: LmdbStoreError) -> Self {
        TesseraError::Store(e.into())
    }
}

/// Persistent cache store on LMDB.
///
/// # Example
///
/// ```ignore
/// let store = LmdbStore::open("lmdb", "/var/cache/tessera", 100)?;
/// store.set("keys:...", &payload, Expiry::Seconds(600)).await?;
/// ```
pub struct LmdbStore {
    name: String,
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
}

impl LmdbStore {
    /// Open (or create) a store.
    ///
    /// # Arguments
    ///
    /// * `name` - Store name used to resolve per-store TTLs
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn open<P: AsRef<Path>>(
        name: impl Into<String>,
        path: P,
        max_size_mb: usize,
    ) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            env,
            db,
        })
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> Result<u64, LmdbStoreError> {
        let now = Utc::now().timestamp_millis();
        let expired = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            let iter = self
                .db
                .iter(&rtxn)
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

            let mut keys = Vec::new();
            for result in iter {
                let (key, bytes) = result.map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
                if is_expired(bytes, now) {
                    keys.push(key.to_vec());
                }
            }
            keys
        };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in &expired {
            if self
                .db
                .delete(&mut wtxn, key)
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?
            {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(deleted)
    }

    fn read(&self, rtxn: &RoTxn<'_>, key: &str, now: i64) -> Result<Option<Value>, LmdbStoreError> {
        let bytes = match self
            .db
            .get(rtxn, key.as_bytes())
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?
        {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        if bytes.len() < HEADER_LEN || is_expired(bytes, now) {
            return Ok(None);
        }

        let value = serde_json::from_slice(&bytes[HEADER_LEN..])
            .map_err(|e| LmdbStoreError::Deserialization(e.to_string()))?;
        Ok(Some(value))
    }
}

fn encode(value: &Value, expiry: Expiry) -> Result<Vec<u8>, LmdbStoreError> {
    let expires_at = match expiry.as_duration() {
        Some(ttl) => {
            let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            Utc::now().timestamp_millis().saturating_add(ttl_millis)
        }
        None => 0,
    };

    let value_bytes =
        serde_json::to_vec(value).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;

    let mut full_bytes = Vec::with_capacity(HEADER_LEN + value_bytes.len());
    full_bytes.extend_from_slice(&expires_at.to_le_bytes());
    full_bytes.extend_from_slice(&value_bytes);
    Ok(full_bytes)
}

fn is_expired(bytes: &[u8], now: i64) -> bool {
    let header: [u8; HEADER_LEN] = match bytes.get(..HEADER_LEN).and_then(|h| h.try_into().ok()) {
        Some(header) => header,
        None => return true,
    };
    let expires_at = i64::from_le_bytes(header);
    expires_at != 0 && expires_at <= now
}

#[async_trait]
impl CacheStore for LmdbStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> TesseraResult<Option<Value>> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(self.read(&rtxn, key, Utc::now().timestamp_millis())?)
    }

    async fn mget(&self, keys: &[String]) -> TesseraResult<Vec<Option<Value>>> {
        let now = Utc::now().timestamp_millis();
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.read(&rtxn, key, now)?);
        }
        Ok(values)
    }

    async fn set(&self, key: &str, value: &Value, expiry: Expiry) -> TesseraResult<()> {
        self.mset(&[(key.to_string(), value.clone())], expiry).await
    }

    async fn mset(&self, entries: &[(String, Value)], expiry: Expiry) -> TesseraResult<()> {
        if !expiry.is_cacheable() || entries.is_empty() {
            return Ok(());
        }

        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            encoded.push((key, encode(value, expiry)?));
        }

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        for (key, bytes) in &encoded {
            self.db
                .put(&mut wtxn, key.as_bytes(), bytes)
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        }

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(())
    }

    async fn del(&self, keys: &[String]) -> TesseraResult<u64> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in keys {
            if self
                .db
                .delete(&mut wtxn, key.as_bytes())
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?
            {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(deleted)
    }

    async fn close(&self) -> TesseraResult<()> {
        self.env
            .force_sync()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store =
            LmdbStore::open("lmdb", temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (store, _temp_dir) = create_test_store();

        store
            .set("keys:a", &json!({"name": "alice"}), Expiry::Seconds(60))
            .await
            .expect("set should succeed");

        let cached = store.get("keys:a").await.expect("get should succeed");
        assert_eq!(cached, Some(json!({"name": "alice"})));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (store, _temp_dir) = create_test_store();
        let cached = store.get("keys:missing").await.expect("get should succeed");
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_no_cache_skips_write() {
        let (store, _temp_dir) = create_test_store();
        store
            .set("keys:a", &json!(1), Expiry::NoCache)
            .await
            .expect("set should succeed");
        assert!(store
            .get("keys:a")
            .await
            .expect("get should succeed")
            .is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let (store, _temp_dir) = create_test_store();

        let past = Utc::now().timestamp_millis() - 1_000;
        let mut bytes = past.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"1");
        {
            let mut wtxn = store.env.write_txn().expect("write_txn should succeed");
            store
                .db
                .put(&mut wtxn, b"keys:old", &bytes)
                .expect("put should succeed");
            wtxn.commit().expect("commit should succeed");
        }
        store
            .set("keys:new", &json!(2), Expiry::Forever)
            .await
            .expect("set should succeed");

        assert!(store
            .get("keys:old")
            .await
            .expect("get should succeed")
            .is_none());
        assert_eq!(store.purge_expired().expect("purge should succeed"), 1);
        assert_eq!(
            store.get("keys:new").await.expect("get should succeed"),
            Some(json!(2))
        );
    }

    #[tokio::test]
    async fn test_mset_mget_and_del() {
        let (store, _temp_dir) = create_test_store();

        store
            .mset(
                &[
                    ("a".to_string(), json!(1)),
                    ("b".to_string(), json!([1, 2])),
                ],
                Expiry::Seconds(60),
            )
            .await
            .expect("mset should succeed");

        let values = store
            .mget(&["a".to_string(), "c".to_string(), "b".to_string()])
            .await
            .expect("mget should succeed");
        assert_eq!(values, vec![Some(json!(1)), None, Some(json!([1, 2]))]);

        let deleted = store
            .del(&["a".to_string(), "c".to_string()])
            .await
            .expect("del should succeed");
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn test_reopen_keeps_entries() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let store =
                LmdbStore::open("lmdb", temp_dir.path(), 10).expect("store creation should succeed");
            store
                .set("keys:a", &json!("kept"), Expiry::Forever)
                .await
                .expect("set should succeed");
            store.close().await.expect("close should succeed");
        }

        let store =
            LmdbStore::open("lmdb", temp_dir.path(), 10).expect("store creation should succeed");
        assert_eq!(
            store.get("keys:a").await.expect("get should succeed"),
            Some(json!("kept"))
        );
    }
}
