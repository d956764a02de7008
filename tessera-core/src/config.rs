//! Cache configuration
//!
//! Configuration is plain data. It can be deserialized from an application
//! config file (every field has a default) or loaded from environment
//! variables with [`CacheConfig::from_env`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ConfigError, TesseraResult};
use crate::ttl::OperationKind;

/// Raw TTL values (seconds) for one store.
///
/// `-1` disables caching, `0` caches indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreTtl {
    pub keys: i64,
    pub queries: i64,
}

impl StoreTtl {
    pub fn new(keys: i64, queries: i64) -> Self {
        Self { keys, queries }
    }

    pub fn for_kind(&self, kind: OperationKind) -> i64 {
        match kind {
            OperationKind::Keys => self.keys,
            OperationKind::Queries => self.queries,
        }
    }
}

/// Global TTLs plus the per-store table used when several stores are active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    pub keys: i64,
    pub queries: i64,
    pub stores: BTreeMap<String, StoreTtl>,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            keys: 60 * 10,
            queries: 5,
            stores: BTreeMap::new(),
        }
    }
}

impl TtlConfig {
    pub fn for_kind(&self, kind: OperationKind) -> i64 {
        match kind {
            OperationKind::Keys => self.keys,
            OperationKind::Queries => self.queries,
        }
    }
}

/// Namespace prefixes for the three families of cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePrefix {
    pub keys: String,
    pub queries: String,
    /// Prefix of the entity-kind sets kept in the distributed store.
    pub kind_sets: String,
}

impl Default for CachePrefix {
    fn default() -> Self {
        Self {
            keys: "keys:".to_string(),
            queries: "queries:".to_string(),
            kind_sets: "kinds:".to_string(),
        }
    }
}

/// Master cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache by default. Per-call options can still opt in or out.
    pub global: bool,
    pub ttl: TtlConfig,
    pub prefix: CachePrefix,
    /// Names of the active stores, in read order.
    ///
    /// Filled in from the cache manager when a `CacheContext` is built.
    pub stores: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            global: true,
            ttl: TtlConfig::default(),
            prefix: CachePrefix::default(),
            stores: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable caching globally.
    pub fn with_global(mut self, enabled: bool) -> Self {
        self.global = enabled;
        self
    }

    /// Set the global TTL for point-key lookups.
    pub fn with_keys_ttl(mut self, secs: i64) -> Self {
        self.ttl.keys = secs;
        self
    }

    /// Set the global TTL for queries.
    pub fn with_queries_ttl(mut self, secs: i64) -> Self {
        self.ttl.queries = secs;
        self
    }

    /// Add a per-store TTL entry.
    pub fn with_store_ttl(mut self, store: impl Into<String>, ttl: StoreTtl) -> Self {
        self.ttl.stores.insert(store.into(), ttl);
        self
    }

    /// Set the key prefixes.
    pub fn with_prefix(mut self, prefix: CachePrefix) -> Self {
        self.prefix = prefix;
        self
    }

    /// Set the active store names.
    pub fn with_stores<I, S>(mut self, stores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stores = stores.into_iter().map(Into::into).collect();
        self
    }

    /// True when more than one backing store is active.
    pub fn is_multi_store(&self) -> bool {
        self.stores.len() > 1
    }

    /// Check prefix invariants.
    ///
    /// The three key families must never collide, so prefixes must be
    /// non-empty and no prefix may start with another.
    pub fn validate(&self) -> TesseraResult<()> {
        let prefixes = [
            ("prefix.keys", &self.prefix.keys),
            ("prefix.queries", &self.prefix.queries),
            ("prefix.kind_sets", &self.prefix.kind_sets),
        ];

        for (field, value) in prefixes {
            if value.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: String::new(),
                    reason: "prefix must not be empty".to_string(),
                }
                .into());
            }
        }

        for (i, (field_a, a)) in prefixes.iter().enumerate() {
            for (field_b, b) in prefixes.iter().skip(i + 1) {
                if a.starts_with(b.as_str()) || b.starts_with(a.as_str()) {
                    return Err(ConfigError::InvalidValue {
                        field: field_b.to_string(),
                        value: b.to_string(),
                        reason: format!("overlaps with {}", field_a),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }

    /// Create a CacheConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TESSERA_CACHE_GLOBAL`: "true"/"false" or "1"/"0" (default: true)
    /// - `TESSERA_TTL_KEYS`: seconds for point-key lookups (default: 600)
    /// - `TESSERA_TTL_QUERIES`: seconds for queries (default: 5)
    /// - `TESSERA_TTL_STORES`: comma-separated store names with their own TTLs
    /// - `TESSERA_TTL_<STORE>_KEYS` / `TESSERA_TTL_<STORE>_QUERIES`: per-store
    ///   values, falling back to the global ones
    /// - `TESSERA_PREFIX_KEYS`, `TESSERA_PREFIX_QUERIES`,
    ///   `TESSERA_PREFIX_KIND_SETS`: key prefixes
    pub fn from_env() -> TesseraResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> TesseraResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let global = parse_flag(&lookup, "TESSERA_CACHE_GLOBAL")?.unwrap_or(defaults.global);

        let keys = parse_secs(&lookup, "TESSERA_TTL_KEYS")?.unwrap_or(defaults.ttl.keys);
        let queries =
            parse_secs(&lookup, "TESSERA_TTL_QUERIES")?.unwrap_or(defaults.ttl.queries);

        let mut stores = BTreeMap::new();
        if let Some(names) = lookup("TESSERA_TTL_STORES") {
            for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                let upper = name.to_uppercase();
                let store_keys = parse_secs(&lookup, &format!("TESSERA_TTL_{}_KEYS", upper))?
                    .unwrap_or(keys);
                let store_queries =
                    parse_secs(&lookup, &format!("TESSERA_TTL_{}_QUERIES", upper))?
                        .unwrap_or(queries);
                stores.insert(name.to_string(), StoreTtl::new(store_keys, store_queries));
            }
        }

        let prefix = CachePrefix {
            keys: lookup("TESSERA_PREFIX_KEYS").unwrap_or(defaults.prefix.keys),
            queries: lookup("TESSERA_PREFIX_QUERIES").unwrap_or(defaults.prefix.queries),
            kind_sets: lookup("TESSERA_PREFIX_KIND_SETS").unwrap_or(defaults.prefix.kind_sets),
        };

        let config = Self {
            global,
            ttl: TtlConfig {
                keys,
                queries,
                stores,
            },
            prefix,
            stores: Vec::new(),
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_flag<F>(lookup: &F, name: &str) -> TesseraResult<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" => Ok(Some(true)),
            "false" | "0" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: "expected true, false, 1 or 0".to_string(),
            }
            .into()),
        },
    }
}

fn parse_secs<F>(lookup: &F, name: &str) -> TesseraResult<Option<i64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<i64>().map(Some).map_err(|_| {
            ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: "expected an integer number of seconds".to_string(),
            }
            .into()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert!(config.global);
        assert_eq!(config.ttl.keys, 600);
        assert_eq!(config.ttl.queries, 5);
        assert_eq!(config.prefix.keys, "keys:");
        assert_eq!(config.prefix.queries, "queries:");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::new()
            .with_global(false)
            .with_keys_ttl(30)
            .with_queries_ttl(0)
            .with_store_ttl("memory", StoreTtl::new(10, 20))
            .with_stores(["memory", "redis"]);

        assert!(!config.global);
        assert_eq!(config.ttl.keys, 30);
        assert_eq!(config.ttl.queries, 0);
        assert_eq!(config.ttl.stores["memory"], StoreTtl::new(10, 20));
        assert!(config.is_multi_store());
    }

    #[test]
    fn test_validate_rejects_overlapping_prefixes() {
        let config = CacheConfig::new().with_prefix(CachePrefix {
            keys: "cache:".to_string(),
            queries: "cache:q:".to_string(),
            kind_sets: "kinds:".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_prefix() {
        let config = CacheConfig::new().with_prefix(CachePrefix {
            keys: String::new(),
            ..CachePrefix::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("TESSERA_CACHE_GLOBAL", "false"),
            ("TESSERA_TTL_QUERIES", "0"),
            ("TESSERA_TTL_STORES", "memory, redis"),
            ("TESSERA_TTL_MEMORY_QUERIES", "1357"),
            ("TESSERA_TTL_REDIS_QUERIES", "2468"),
        ]))
        .expect("config should load");

        assert!(!config.global);
        assert_eq!(config.ttl.queries, 0);
        assert_eq!(config.ttl.keys, 600);
        assert_eq!(config.ttl.stores["memory"], StoreTtl::new(600, 1357));
        assert_eq!(config.ttl.stores["redis"], StoreTtl::new(600, 2468));
    }

    #[test]
    fn test_from_lookup_rejects_non_numeric_ttl() {
        let err = CacheConfig::from_lookup(lookup_from(&[("TESSERA_TTL_KEYS", "ten")]))
            .expect_err("non-numeric ttl should fail");
        assert!(format!("{}", err).contains("TESSERA_TTL_KEYS"));
    }

    #[test]
    fn test_global_flag_values() {
        for (raw, expected) in [("true", true), ("1", true), ("FALSE", false), (" 0 ", false)] {
            let config = CacheConfig::from_lookup(lookup_from(&[("TESSERA_CACHE_GLOBAL", raw)]))
                .expect("config should load");
            assert_eq!(config.global, expected, "value {:?}", raw);
        }

        for raw in ["off", "no", ""] {
            let err = CacheConfig::from_lookup(lookup_from(&[("TESSERA_CACHE_GLOBAL", raw)]))
                .expect_err("unrecognised flag should fail");
            assert!(matches!(
                err,
                crate::error::TesseraError::Config(ConfigError::InvalidValue { ref field, .. })
                    if field == "TESSERA_CACHE_GLOBAL"
            ));
        }
    }

    #[test]
    fn test_deserialize_partial() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"ttl": {"queries": 0}}"#).expect("deserialize should succeed");
        assert_eq!(config.ttl.queries, 0);
        assert_eq!(config.ttl.keys, 600);
        assert!(config.global);
    }
}
