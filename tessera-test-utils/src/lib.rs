//! Tessera Test Utilities
//!
//! Shared test infrastructure for the Tessera workspace:
//! - Proptest generators for query specifications and keys
//! - Counting and failing fetchers
//! - A distributed store that records its batches
//! - Fixtures and custom assertions
//! - Tracing setup for tests

// Re-export core types for convenience
pub use tessera_core::{
    CacheConfig, CacheOptions, ConfigError, DatastoreKey, EntityKind, FetchError, FilterExpr,
    FilterOperator, KeyLookup, Keyed, OrderClause, QueryInfo, QueryResult, QuerySpec, StoreError,
    StoreTtl, TesseraError, TesseraResult,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tessera_storage::{KeyFetcher, QueryFetcher};

// ============================================================================
// FETCHERS
// ============================================================================

/// Query fetcher that answers every query with the same result and counts
/// its calls.
#[derive(Debug)]
pub struct CountingQueryFetcher<T> {
    result: QueryResult<T>,
    calls: AtomicUsize,
}

impl<T> CountingQueryFetcher<T> {
    pub fn new(result: QueryResult<T>) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> QueryFetcher<T> for CountingQueryFetcher<T> {
    async fn fetch(&self, _query: &QuerySpec) -> TesseraResult<QueryResult<T>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result.clone())
    }
}

/// Key fetcher backed by a fixed table. Keys outside the table are
/// reported as not found. Every requested batch is recorded.
#[derive(Debug)]
pub struct CountingKeyFetcher<T> {
    records: HashMap<DatastoreKey, T>,
    batches: Mutex<Vec<Vec<DatastoreKey>>>,
}

impl<T> CountingKeyFetcher<T> {
    pub fn new<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (DatastoreKey, T)>,
    {
        Self {
            records: records.into_iter().collect(),
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Batches requested so far, in call order.
    pub fn batches(&self) -> Vec<Vec<DatastoreKey>> {
        self.batches
            .lock()
            .map(|batches| batches.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.batches().len()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> KeyFetcher<T> for CountingKeyFetcher<T> {
    async fn fetch(&self, keys: &[DatastoreKey]) -> TesseraResult<Vec<KeyLookup<T>>> {
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(keys.to_vec());
        }
        Ok(keys
            .iter()
            .map(|key| match self.records.get(key) {
                Some(record) => KeyLookup::Found(record.clone()),
                None => KeyLookup::NotFound,
            })
            .collect())
    }
}

/// Fetcher whose every call fails with [`FetchError::Failed`].
#[derive(Debug, Default)]
pub struct FailingFetcher {
    calls: AtomicUsize,
}

impl FailingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail(&self) -> TesseraError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        FetchError::Failed {
            reason: "datastore unavailable".to_string(),
        }
        .into()
    }
}

#[async_trait]
impl<T: Send + 'static> QueryFetcher<T> for FailingFetcher {
    async fn fetch(&self, _query: &QuerySpec) -> TesseraResult<QueryResult<T>> {
        Err(self.fail())
    }
}

#[async_trait]
impl<T: Send + 'static> KeyFetcher<T> for FailingFetcher {
    async fn fetch(&self, _keys: &[DatastoreKey]) -> TesseraResult<Vec<KeyLookup<T>>> {
        Err(self.fail())
    }
}

// ============================================================================
// STORES
// ============================================================================

pub mod stores {
    //! Store wrappers that make batch traffic observable.

    use super::*;
    use serde_json::Value;
    use tessera_core::Expiry;
    use tessera_storage::{CacheStore, Command, DistributedStore, InProcessDistributedStore, Reply};

    /// In-process distributed store that records every atomic batch and can
    /// be told to fail the next one.
    pub struct RecordingDistributedStore {
        inner: InProcessDistributedStore,
        batches: Mutex<Vec<Vec<Command>>>,
        fail_next: AtomicBool,
    }

    impl RecordingDistributedStore {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                inner: InProcessDistributedStore::new(name),
                batches: Mutex::new(Vec::new()),
                fail_next: AtomicBool::new(false),
            }
        }

        /// Batches executed so far, in call order.
        pub fn batches(&self) -> Vec<Vec<Command>> {
            self.batches
                .lock()
                .map(|batches| batches.clone())
                .unwrap_or_default()
        }

        /// Make the next `exec` fail with a transport error.
        pub fn fail_next_exec(&self) {
            self.fail_next.store(true, Ordering::SeqCst);
        }

        pub async fn contains(&self, key: &str) -> bool {
            self.inner.contains(key).await
        }
    }

    #[async_trait]
    impl CacheStore for RecordingDistributedStore {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn is_distributed(&self) -> bool {
            true
        }

        async fn get(&self, key: &str) -> TesseraResult<Option<Value>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &Value, expiry: Expiry) -> TesseraResult<()> {
            CacheStore::set(&self.inner, key, value, expiry).await
        }

        async fn del(&self, keys: &[String]) -> TesseraResult<u64> {
            CacheStore::del(&self.inner, keys).await
        }
    }

    #[async_trait]
    impl DistributedStore for RecordingDistributedStore {
        async fn exec(&self, commands: Vec<Command>) -> TesseraResult<Vec<Reply>> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Transport {
                    store: self.inner.name().to_string(),
                    reason: "connection reset".to_string(),
                }
                .into());
            }
            if let Ok(mut batches) = self.batches.lock() {
                batches.push(commands.clone());
            }
            self.inner.exec(commands).await
        }

        async fn smembers(&self, key: &str) -> TesseraResult<Vec<String>> {
            self.inner.smembers(key).await
        }

        async fn del_keys(&self, keys: &[String]) -> TesseraResult<u64> {
            self.inner.del_keys(keys).await
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Tessera types.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    pub fn arb_kind_name() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{0,7}"
    }

    pub fn arb_filter_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            "[a-z0-9|,:\"]{0,10}".prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            Just(Value::Null),
            prop::collection::vec(any::<i32>(), 0..4).prop_map(Value::from),
        ]
    }

    pub fn arb_filter() -> impl Strategy<Value = FilterExpr> {
        let operator = prop_oneof![
            Just(FilterOperator::Eq),
            Just(FilterOperator::Ne),
            Just(FilterOperator::Gt),
            Just(FilterOperator::Lt),
            Just(FilterOperator::Gte),
            Just(FilterOperator::Lte),
            Just(FilterOperator::In),
            Just(FilterOperator::NotIn),
        ];
        ("[a-z]{1,8}", operator, arb_filter_value())
            .prop_map(|(field, op, value)| FilterExpr::new(field, op, value))
    }

    pub fn arb_order() -> impl Strategy<Value = OrderClause> {
        ("[a-z]{1,8}", any::<bool>()).prop_map(|(field, ascending)| {
            if ascending {
                OrderClause::asc(field)
            } else {
                OrderClause::desc(field)
            }
        })
    }

    pub fn arb_query_spec() -> impl Strategy<Value = QuerySpec> {
        (
            prop::collection::vec(arb_kind_name(), 1..3),
            prop::option::of("[a-z-]{1,10}"),
            prop::collection::vec(arb_filter(), 0..4),
            prop::collection::vec(arb_order(), 0..3),
            prop::option::of(1u32..1000),
            prop::option::of(0u32..100),
            prop::option::of("[A-Za-z0-9]{4,16}"),
        )
            .prop_map(|(kinds, namespace, filters, orders, limit, offset, cursor)| {
                let mut query = QuerySpec::for_kinds(kinds);
                query.namespace = namespace;
                query.filters = filters;
                query.orders = orders;
                query.limit = limit;
                query.offset = offset;
                query.start_cursor = cursor;
                query
            })
    }

    pub fn arb_datastore_key() -> impl Strategy<Value = DatastoreKey> {
        let id = prop_oneof![
            (1i64..i64::MAX).prop_map(tessera_core::KeyId::from),
            "[a-z0-9_-]{1,12}".prop_map(tessera_core::KeyId::from),
        ];
        (arb_kind_name(), id, prop::option::of(("[A-Z][a-z]{0,5}", 1i64..1000)))
            .prop_map(|(kind, id, parent)| match parent {
                Some((parent_kind, parent_id)) => {
                    DatastoreKey::new(parent_kind, parent_id).child(kind, id)
                }
                None => DatastoreKey::new(kind, id),
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records, keys and queries.

    use super::*;
    use serde::{Deserialize, Serialize};

    /// Record type used across orchestrator tests.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct User {
        pub name: String,
        pub age: u32,
    }

    pub fn user(name: &str, age: u32) -> User {
        User {
            name: name.to_string(),
            age,
        }
    }

    pub fn user_key(id: i64) -> DatastoreKey {
        DatastoreKey::new("User", id)
    }

    /// `User` query filtered on age and ordered by name.
    pub fn user_query() -> QuerySpec {
        QuerySpec::new("User")
            .filter(FilterExpr::new("age", FilterOperator::Gte, 18))
            .order(OrderClause::asc("name"))
            .limit(10)
    }

    /// Result holding `count` users keyed `1..=count`.
    pub fn user_result(count: i64) -> QueryResult<User> {
        QueryResult::new(
            (1..=count)
                .map(|id| Keyed::new(user(&format!("user-{}", id), 20 + id as u32), user_key(id)))
                .collect(),
            QueryInfo::default(),
        )
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on Tessera error variants.

    use super::*;

    /// Assert that a TesseraResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        match result {
            Err(TesseraError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a TesseraResult is a failed fetch.
    #[track_caller]
    pub fn assert_fetch_failed<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        match result {
            Err(TesseraError::Fetch(FetchError::Failed { .. })) => {}
            other => panic!("Expected Fetch::Failed error, got: {:?}", other),
        }
    }

    /// Assert that a TesseraResult is a not-found rejection for `key`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &TesseraResult<T>, key: &DatastoreKey) {
        let expected = match tessera_core::stringify_key(key) {
            Ok(expected) => expected,
            Err(e) => panic!("Key {:?} cannot be stringified: {:?}", key, e),
        };
        match result {
            Err(TesseraError::Fetch(FetchError::NotFound { key: got })) => {
                assert_eq!(*got, expected, "Wrong key in NotFound error");
            }
            other => panic!("Expected NotFound error for {}, got: {:?}", expected, other),
        }
    }
}

// ============================================================================
// TRACING
// ============================================================================

pub mod telemetry {
    //! Tracing subscriber setup for tests.

    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    /// Test logging configuration from environment variables.
    #[derive(Debug, Clone)]
    pub struct TelemetryConfig {
        /// Emit JSON lines instead of human-readable output
        pub json: bool,
        /// Filter directive used when `RUST_LOG` is unset
        pub default_filter: String,
    }

    impl TelemetryConfig {
        /// Read `TESSERA_LOG_JSON` ("true" or "1").
        pub fn from_env() -> Self {
            Self {
                json: std::env::var("TESSERA_LOG_JSON")
                    .map(|s| s == "true" || s == "1")
                    .unwrap_or(false),
                default_filter: "tessera_storage=debug,info".to_string(),
            }
        }
    }

    /// Install a test-writer subscriber. Safe to call from every test; only
    /// the first call installs anything.
    pub fn init_test_tracing() {
        let config = TelemetryConfig::from_env();
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

        let registry = tracing_subscriber::registry().with(env_filter);
        let _ = if config.json {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_test_writer())
                .try_init()
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_test_writer())
                .try_init()
        };
    }
}
