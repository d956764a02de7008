//! Fuzz test for the query stringifier
//!
//! Feeds arbitrary JSON through `QuerySpec` deserialization and checks:
//! - Stringifying never panics
//! - Equal specifications stringify equally
//! - Query and key cache keys never share a prefix family
//!
//! Run with: cargo +nightly fuzz run stringify_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use tessera_core::{query_cache_key, stringify_query, CachePrefix, QuerySpec};

fuzz_target!(|data: &[u8]| {
    let Ok(query) = serde_json::from_slice::<QuerySpec>(data) else {
        return;
    };

    // Invalid specs are rejected, never panicked on
    let Ok(first) = stringify_query(&query) else {
        return;
    };

    let copy = query.clone();
    assert_eq!(
        stringify_query(&copy).ok().as_deref(),
        Some(first.as_str()),
        "Equal specs must stringify equally"
    );

    let prefix = CachePrefix::default();
    if let Ok(key) = query_cache_key(&prefix.queries, &query) {
        assert!(key.starts_with(&prefix.queries));
        assert!(!key.starts_with(&prefix.keys));
        assert!(!key.starts_with(&prefix.kind_sets));
    }
});
