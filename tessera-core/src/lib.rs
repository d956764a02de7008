//! Tessera Core - Cache Policy Types
//!
//! Pure data types and pure functions shared by the cache orchestrators:
//! query specifications, datastore keys, configuration, TTL resolution and
//! cache key derivation. Nothing in this crate performs I/O.

pub mod config;
pub mod entity;
pub mod error;
pub mod filter;
pub mod options;
pub mod query;
pub mod record;
pub mod stringify;
pub mod ttl;

pub use config::{CacheConfig, CachePrefix, StoreTtl, TtlConfig};
pub use entity::{DatastoreKey, EntityKind, KeyId, PathElement};
pub use error::{ConfigError, FetchError, StoreError, TesseraError, TesseraResult, ValidationError};
pub use filter::{FilterExpr, FilterOperator, OrderClause, SortDirection};
pub use options::CacheOptions;
pub use query::{MoreResults, QueryInfo, QueryResult, QuerySpec};
pub use record::{KeyLookup, Keyed};
pub use stringify::{
    canonical_json, key_cache_key, kind_set_key, query_cache_key, stringify_key, stringify_query,
};
pub use ttl::{caching_enabled, resolve_ttl, Expiry, OperationKind, PerStoreTtl, Ttl};
