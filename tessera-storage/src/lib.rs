//! Tessera Storage - Cache Orchestration
//!
//! Caching policy layer over a document datastore. Query results and point
//! lookups are cached through a pluggable [`cache::CacheManager`]; when a
//! distributed store is configured to keep queries forever, query keys are
//! indexed per entity kind so a whole kind can be invalidated at once.

pub mod cache;

pub use cache::{
    CacheContext, CacheContextBuilder, CacheManager, CacheStats, CacheStore, CacheableRecord,
    Command, DistributedStore, EntityKindIndex, FnKeyFetcher, FnQueryFetcher,
    InProcessDistributedStore, KeyCache, KeyFetcher, LmdbStore, LmdbStoreError, MemoryStore,
    MemoryStoreConfig, MultiStoreCacheManager, QueryCache, QueryFetcher, Reply, StoreInfo,
    StoredQueryResult, StoredRecord,
};

#[cfg(feature = "redis")]
pub use cache::RedisStore;
