//! TTL model and resolution.
//!
//! Raw configuration values are signed seconds with two sentinels: a
//! negative value means "do not cache" and zero means "cache indefinitely".
//! They are decoded into [`Expiry`] as soon as they leave configuration.
//!
//! With a single store the resolved TTL is a plain [`Expiry`]. With several
//! stores the same logical entry may need a different TTL in each one, so
//! resolution yields a [`PerStoreTtl`] that every store adapter queries with
//! its own name.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::options::CacheOptions;

/// Which family of cache entries an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Keys,
    Queries,
}

/// Decoded TTL for one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expiry {
    /// Do not cache at all.
    NoCache,
    /// Cache without expiry.
    Forever,
    /// Expire after the given number of seconds.
    Seconds(u64),
}

impl Expiry {
    /// Decode a raw configuration value.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            s if s < 0 => Self::NoCache,
            0 => Self::Forever,
            s => Self::Seconds(s as u64),
        }
    }

    /// Encode back to the raw configuration form.
    pub fn as_secs(&self) -> i64 {
        match self {
            Self::NoCache => -1,
            Self::Forever => 0,
            Self::Seconds(s) => i64::try_from(*s).unwrap_or(i64::MAX),
        }
    }

    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Self::NoCache)
    }

    /// Expiry as a duration; `None` when the entry never expires or is not cached.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Seconds(s) => Some(Duration::from_secs(*s)),
            Self::NoCache | Self::Forever => None,
        }
    }
}

/// Per-store TTL resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerStoreTtl {
    stores: BTreeMap<String, Expiry>,
    fallback: Expiry,
}

impl PerStoreTtl {
    pub fn new(stores: BTreeMap<String, Expiry>, fallback: Expiry) -> Self {
        Self { stores, fallback }
    }

    /// TTL for the named store; stores without an entry get the global value.
    pub fn for_store(&self, store: &str) -> Expiry {
        self.stores.get(store).copied().unwrap_or(self.fallback)
    }
}

/// TTL applied to one cache operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ttl {
    Fixed(Expiry),
    PerStore(PerStoreTtl),
}

impl Ttl {
    /// Resolve the TTL for a concrete store.
    pub fn for_store(&self, store: &str) -> Expiry {
        match self {
            Self::Fixed(expiry) => *expiry,
            Self::PerStore(resolver) => resolver.for_store(store),
        }
    }

    /// True when this TTL disables caching outright.
    pub fn is_no_cache(&self) -> bool {
        matches!(self, Self::Fixed(Expiry::NoCache))
    }
}

/// Resolve the TTL for an operation.
///
/// Precedence, highest first:
/// 1. per-call `ttl` override
/// 2. a negative global value for the operation kind (never cache)
/// 3. multi-store configuration (per-store resolver)
/// 4. the global value for the operation kind
pub fn resolve_ttl(config: &CacheConfig, options: &CacheOptions, kind: OperationKind) -> Ttl {
    if let Some(secs) = options.ttl {
        return Ttl::Fixed(Expiry::from_secs(secs));
    }

    let global = config.ttl.for_kind(kind);
    if global < 0 {
        return Ttl::Fixed(Expiry::NoCache);
    }

    if config.is_multi_store() {
        let stores = config
            .stores
            .iter()
            .filter_map(|name| {
                config
                    .ttl
                    .stores
                    .get(name)
                    .map(|ttl| (name.clone(), Expiry::from_secs(ttl.for_kind(kind))))
            })
            .collect();
        return Ttl::PerStore(PerStoreTtl::new(stores, Expiry::from_secs(global)));
    }

    Ttl::Fixed(Expiry::from_secs(global))
}

/// Decide whether an operation goes through the cache at all.
///
/// Caching is skipped when the resolved TTL is "never cache", when the call
/// opts out, or when caching is globally disabled and the call does not opt
/// in.
pub fn caching_enabled(config: &CacheConfig, options: &CacheOptions, ttl: &Ttl) -> bool {
    if ttl.is_no_cache() {
        return false;
    }
    match options.cache {
        Some(explicit) => explicit,
        None => config.global,
    }
}
