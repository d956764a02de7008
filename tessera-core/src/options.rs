//! Per-call cache options.

use serde::{Deserialize, Serialize};

/// Options accepted by every cache operation.
///
/// Both fields are optional; `None` defers to the global configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Explicitly opt in (`Some(true)`) or out (`Some(false)`) of caching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<bool>,
    /// TTL override in seconds (`-1` never cache, `0` cache indefinitely).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip the cache for this call.
    pub fn bypass() -> Self {
        Self {
            cache: Some(false),
            ttl: None,
        }
    }

    /// Use the cache for this call even if caching is globally disabled.
    pub fn force() -> Self {
        Self {
            cache: Some(true),
            ttl: None,
        }
    }

    /// Override the TTL for this call.
    pub fn with_ttl(mut self, secs: i64) -> Self {
        self.ttl = Some(secs);
        self
    }
}
