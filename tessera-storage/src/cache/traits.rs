//! Cache store, cache manager and distributed-store traits.
//!
//! Stores exchange plain JSON values; typed records are marshalled by the
//! orchestrators before they reach this layer (see `envelope`).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tessera_core::{Expiry, TesseraResult, Ttl};

/// Marker trait for records that can flow through the cache.
///
/// Blanket-implemented for every type that is `Clone`, `Serialize`,
/// `DeserializeOwned` and `Send + Sync + 'static`.
pub trait CacheableRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheableRecord for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Name and capabilities of one store behind a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    pub name: String,
    pub distributed: bool,
}

/// A single cache backend.
///
/// Implementations must be thread-safe. A write with [`Expiry::NoCache`]
/// is a no-op.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Name used to resolve per-store TTLs.
    fn name(&self) -> &str;

    /// True for a store shared between processes that supports sets and
    /// atomic batches.
    fn is_distributed(&self) -> bool {
        false
    }

    async fn get(&self, key: &str) -> TesseraResult<Option<Value>>;

    async fn mget(&self, keys: &[String]) -> TesseraResult<Vec<Option<Value>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn set(&self, key: &str, value: &Value, expiry: Expiry) -> TesseraResult<()>;

    async fn mset(&self, entries: &[(String, Value)], expiry: Expiry) -> TesseraResult<()> {
        for (key, value) in entries {
            self.set(key, value, expiry).await?;
        }
        Ok(())
    }

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> TesseraResult<u64>;

    /// Release resources held by the store.
    async fn close(&self) -> TesseraResult<()> {
        Ok(())
    }
}

/// Generic cache manager consumed by the orchestrators.
///
/// The `Ttl` handed to writes may be per-store; each store resolves it with
/// its own name.
#[async_trait]
pub trait CacheManager: Send + Sync {
    /// Stores behind this manager, in read order.
    fn stores(&self) -> Vec<StoreInfo>;

    /// Direct handle to one store, for targeted writes.
    fn store(&self, name: &str) -> Option<Arc<dyn CacheStore>>;

    async fn get(&self, key: &str) -> TesseraResult<Option<Value>>;

    async fn mget(&self, keys: &[String]) -> TesseraResult<Vec<Option<Value>>>;

    async fn set(&self, key: &str, value: &Value, ttl: &Ttl) -> TesseraResult<()>;

    async fn mset(&self, entries: &[(String, Value)], ttl: &Ttl) -> TesseraResult<()>;

    async fn del(&self, keys: &[String]) -> TesseraResult<u64>;

    /// Write a freshly fetched value.
    async fn prime_cache(&self, key: &str, value: &Value, ttl: &Ttl) -> TesseraResult<()> {
        self.set(key, value, ttl).await
    }

    async fn close(&self) -> TesseraResult<()>;
}

/// One command of an atomic distributed-store batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Add `member` to the set at `key`.
    SAdd { key: String, member: String },
    /// Write a string value without expiry.
    Set { key: String, value: String },
    /// Write a string value expiring after `seconds`.
    SetEx {
        key: String,
        seconds: u64,
        value: String,
    },
    /// Read the members of the set at `key`.
    SMembers { key: String },
    /// Delete keys.
    Del { keys: Vec<String> },
}

/// Reply to one [`Command`], in batch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Integer(i64),
    Members(Vec<String>),
}

impl Reply {
    /// Set members carried by an `SMembers` reply.
    pub fn into_members(self) -> Option<Vec<String>> {
        match self {
            Self::Members(members) => Some(members),
            _ => None,
        }
    }
}

/// Client of the distributed store.
#[async_trait]
pub trait DistributedStore: Send + Sync {
    /// Run every command in one MULTI/EXEC transaction.
    async fn exec(&self, commands: Vec<Command>) -> TesseraResult<Vec<Reply>>;

    async fn smembers(&self, key: &str) -> TesseraResult<Vec<String>>;

    /// Delete keys in one batch, returning the store's reported count.
    async fn del_keys(&self, keys: &[String]) -> TesseraResult<u64>;
}
