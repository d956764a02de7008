//! Cache layer: stores, manager, invalidation index and orchestrators.
//!
//! # Topology
//!
//! A [`CacheContext`] owns one [`CacheManager`] (by default a
//! [`MultiStoreCacheManager`] over one or more [`CacheStore`]s) and, when a
//! distributed store is configured, an [`EntityKindIndex`] bound to it.
//! [`QueryCache`] and [`KeyCache`] are cheap handles over the context.
//!
//! # Priming routes
//!
//! On a query cache miss the fetched result is written back through one of
//! two routes:
//!
//! - the distributed store keeps queries forever (TTL `0`): the cache key is
//!   registered in the entity-kind set of every kind the query touches and
//!   the payload is written in the same atomic batch. Non-distributed stores
//!   are primed concurrently with their own TTL.
//! - otherwise the payload goes through the manager's generic write path,
//!   with the TTL resolved per store.
//!
//! # Concurrency
//!
//! There is no single-flight: two callers missing the same key both fetch
//! and both prime, and the last write wins. Registration and invalidation of
//! the same entity kind are each atomic but may interleave.
//!
//! # Example
//!
//! ```ignore
//! let ctx = CacheContext::builder(CacheConfig::default())
//!     .store(Arc::new(MemoryStore::new("memory", MemoryStoreConfig::default())))
//!     .build()?;
//!
//! let users: QueryResult<User> = ctx
//!     .queries()
//!     .get_with(&QuerySpec::new("User"), &CacheOptions::new(), &fetcher)
//!     .await?;
//! ```

pub mod context;
pub mod distributed;
pub mod envelope;
pub mod fetch;
pub mod key_cache;
pub mod kind_index;
pub mod lmdb_backend;
pub mod manager;
pub mod memory;
pub mod query_cache;
#[cfg(feature = "redis")]
pub mod redis_backend;
pub mod stats;
pub mod traits;

pub use context::{CacheContext, CacheContextBuilder};
pub use distributed::InProcessDistributedStore;
pub use envelope::{StoredQueryResult, StoredRecord};
pub use fetch::{FnKeyFetcher, FnQueryFetcher, KeyFetcher, QueryFetcher};
pub use key_cache::KeyCache;
pub use kind_index::EntityKindIndex;
pub use lmdb_backend::{LmdbStore, LmdbStoreError};
pub use manager::MultiStoreCacheManager;
pub use memory::{MemoryStore, MemoryStoreConfig};
pub use query_cache::QueryCache;
#[cfg(feature = "redis")]
pub use redis_backend::RedisStore;
pub use stats::CacheStats;
pub use traits::{
    CacheManager, CacheStore, CacheableRecord, Command, DistributedStore, Reply, StoreInfo,
};
