//! Key cache behaviour through `CacheContext`.

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;
use tessera_core::key_cache_key;
use tessera_storage::{
    CacheContext, CacheStore, InProcessDistributedStore, KeyFetcher, LmdbStore, MemoryStore,
    MemoryStoreConfig,
};
use tessera_test_utils::fixtures::{user, user_key, User};
use tessera_test_utils::telemetry::init_test_tracing;
use tessera_test_utils::{
    assertions, CacheConfig, CacheOptions, CountingKeyFetcher, FailingFetcher,
    KeyLookup, Keyed, StoreTtl, TesseraError,
};

fn memory_context(config: CacheConfig) -> (CacheContext, Arc<MemoryStore>) {
    init_test_tracing();
    let memory = Arc::new(MemoryStore::new("memory", MemoryStoreConfig::default()));
    let ctx = CacheContext::builder(config)
        .store(memory.clone())
        .build()
        .expect("build should succeed");
    (ctx, memory)
}

fn directory() -> CountingKeyFetcher<User> {
    CountingKeyFetcher::new([
        (user_key(1), user("ada", 36)),
        (user_key(2), user("grace", 45)),
        (user_key(3), user("edsger", 72)),
    ])
}

#[tokio::test]
async fn test_missing_key_resolves_to_none_in_its_position() {
    let (ctx, _memory) = memory_context(CacheConfig::default());
    let fetcher = directory();

    let results: Vec<Option<Keyed<User>>> = ctx
        .keys()
        .wrap_with(
            &[user_key(1), user_key(99), user_key(3)],
            &CacheOptions::new(),
            &fetcher,
        )
        .await
        .expect("wrap should succeed");

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_deref(), Some(&user("ada", 36)));
    assert!(results[1].is_none());
    assert_eq!(results[2].as_deref(), Some(&user("edsger", 72)));
}

#[tokio::test]
async fn test_second_wrap_only_fetches_what_was_missing() {
    let (ctx, _memory) = memory_context(CacheConfig::default());
    let fetcher = directory();
    let cache = ctx.keys();

    let _: Vec<Option<Keyed<User>>> = cache
        .wrap_with(&[user_key(1)], &CacheOptions::new(), &fetcher)
        .await
        .expect("wrap should succeed");
    let _: Vec<Option<Keyed<User>>> = cache
        .wrap_with(&[user_key(1), user_key(2), user_key(2)], &CacheOptions::new(), &fetcher)
        .await
        .expect("wrap should succeed");

    assert_eq!(
        fetcher.batches(),
        vec![vec![user_key(1)], vec![user_key(2)]]
    );

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 3);
    assert_eq!(stats.fetches, 2);
}

#[tokio::test]
async fn test_not_found_keys_are_refetched() {
    let (ctx, _memory) = memory_context(CacheConfig::default());
    let fetcher = directory();

    for _ in 0..2 {
        let results: Vec<Option<Keyed<User>>> = ctx
            .keys()
            .wrap_with(&[user_key(42)], &CacheOptions::new(), &fetcher)
            .await
            .expect("wrap should succeed");
        assert!(results[0].is_none());
    }
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_set_then_get_attaches_key() {
    let (ctx, _memory) = memory_context(CacheConfig::default());
    let key = user_key(7).with_namespace("tenant-a");

    ctx.keys()
        .set(&key, &user("barbara", 50), &CacheOptions::new())
        .await
        .expect("set should succeed");

    let cached: Keyed<User> = ctx
        .keys()
        .get(&key)
        .await
        .expect("get should succeed")
        .expect("record should be cached");

    assert_eq!(*cached, user("barbara", 50));
    assert_eq!(cached.key(), &key);
    assert_eq!(cached, Keyed::new(user("barbara", 50), user_key(8)));
}

#[tokio::test]
async fn test_wrap_one_rejects_missing_key() {
    let (ctx, _memory) = memory_context(CacheConfig::default());
    let fetcher = directory();

    let found: Keyed<User> = ctx
        .keys()
        .wrap_one_with(&user_key(2), &CacheOptions::new(), &fetcher)
        .await
        .expect("wrap_one should succeed");
    assert_eq!(found.name, "grace");

    let missing = ctx
        .keys()
        .wrap_one_with::<User, _>(&user_key(5), &CacheOptions::new(), &fetcher)
        .await;
    assertions::assert_not_found(&missing, &user_key(5));
}

#[tokio::test]
async fn test_fetch_failure_rejects_whole_batch() {
    let (ctx, memory) = memory_context(CacheConfig::default());
    let result = ctx
        .keys()
        .wrap_with::<User, _>(&[user_key(1), user_key(2)], &CacheOptions::new(), &FailingFetcher::new())
        .await;

    assertions::assert_fetch_failed(&result);
    assert!(memory.is_empty());
}

#[tokio::test]
async fn test_mset_mget_del() {
    let (ctx, _memory) = memory_context(CacheConfig::default());
    let cache = ctx.keys();
    cache
        .mset(
            &[(user_key(1), user("ada", 36)), (user_key(2), user("grace", 45))],
            &CacheOptions::new(),
        )
        .await
        .expect("mset should succeed");

    let records: Vec<Option<Keyed<User>>> = cache
        .mget(&[user_key(2), user_key(3), user_key(1)])
        .await
        .expect("mget should succeed");
    assert_eq!(
        records.iter().map(|r| r.as_ref().map(|r| r.key().clone())).collect::<Vec<_>>(),
        vec![Some(user_key(2)), None, Some(user_key(1))]
    );

    assert_eq!(
        cache
            .del(&[user_key(1), user_key(2), user_key(3)])
            .await
            .expect("del should succeed"),
        2
    );
}

#[tokio::test]
async fn test_default_loader() {
    let (ctx, _memory) = memory_context(CacheConfig::default());
    let loader = Arc::new(CountingKeyFetcher::new([(
        user_key(1),
        json!({ "name": "ada", "age": 36 }),
    )]));
    let shared: Arc<dyn KeyFetcher<serde_json::Value>> = loader.clone();
    let cache = ctx.keys().with_loader(shared);

    let record: Keyed<User> = cache
        .wrap_one(&user_key(1), &CacheOptions::new())
        .await
        .expect("wrap_one should succeed");
    assert_eq!(*record, user("ada", 36));

    let missing = cache.wrap::<User>(&[user_key(2)], &CacheOptions::new()).await;
    assert!(matches!(missing.as_deref(), Ok([None])));
    assert_eq!(loader.calls(), 2);
}

#[tokio::test]
async fn test_without_loader_is_config_error() {
    let (ctx, _memory) = memory_context(CacheConfig::default());
    let result = ctx.keys().wrap::<User>(&[user_key(1)], &CacheOptions::new()).await;
    assertions::assert_config_error(&result);
}

#[tokio::test]
async fn test_per_store_ttl_for_keys() {
    init_test_tracing();
    let memory = Arc::new(MemoryStore::new("memory", MemoryStoreConfig::default()));
    let redis = Arc::new(InProcessDistributedStore::new("redis"));
    let config = CacheConfig::default()
        .with_store_ttl("memory", StoreTtl::new(-1, 5))
        .with_store_ttl("redis", StoreTtl::new(120, 5));
    let ctx = CacheContext::builder(config)
        .store(memory.clone())
        .distributed_store(redis.clone())
        .build()
        .expect("build should succeed");

    ctx.keys()
        .set(&user_key(1), &user("ada", 36), &CacheOptions::new())
        .await
        .expect("set should succeed");

    assert!(memory.is_empty());
    let cache_key = key_cache_key("keys:", &user_key(1)).expect("stringify should succeed");
    assert!(redis
        .get(&cache_key)
        .await
        .expect("get should succeed")
        .is_some());
}

#[tokio::test]
async fn test_lmdb_store_behind_key_cache() {
    init_test_tracing();
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let lmdb = Arc::new(LmdbStore::open("lmdb", dir.path(), 16).expect("open should succeed"));
    let ctx = CacheContext::builder(CacheConfig::default())
        .store(lmdb.clone())
        .build()
        .expect("build should succeed");

    ctx.keys()
        .set(&user_key(3), &user("edsger", 72), &CacheOptions::new())
        .await
        .expect("set should succeed");
    let cached: Option<Keyed<User>> = ctx.keys().get(&user_key(3)).await.expect("get should succeed");
    assert_eq!(cached.map(Keyed::into_parts), Some((user("edsger", 72), user_key(3))));

    ctx.dispose().await.expect("dispose should succeed");
    let result = ctx.keys().get::<User>(&user_key(3)).await;
    assert!(matches!(result, Err(TesseraError::Config(_))));
}

mod prop_tests {
    use super::*;
    use tessera_test_utils::generators::arb_datastore_key;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Every key handed to `wrap_with` comes back with its own identity.
        #[test]
        fn prop_wrap_attaches_requested_keys(
            keys in prop::collection::vec(arb_datastore_key(), 1..6)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .map_err(|e| TestCaseError::fail(format!("runtime: {}", e)))?;

            let fetcher = CountingKeyFetcher::new(
                keys.iter().map(|key| (key.clone(), user("any", 1))),
            );
            let results = runtime.block_on(async {
                let ctx = CacheContext::builder(CacheConfig::default())
                    .store(Arc::new(MemoryStore::new("memory", MemoryStoreConfig::default())))
                    .build()?;
                let first: Vec<Option<Keyed<User>>> =
                    ctx.keys().wrap_with(&keys, &CacheOptions::new(), &fetcher).await?;
                let second: Vec<Option<Keyed<User>>> =
                    ctx.keys().wrap_with(&keys, &CacheOptions::new(), &fetcher).await?;
                Ok::<_, TesseraError>((first, second))
            });

            let (first, second) = results.map_err(|e| TestCaseError::fail(format!("cache: {}", e)))?;
            for (requested, (a, b)) in keys.iter().zip(first.iter().zip(&second)) {
                prop_assert_eq!(a.as_ref().map(Keyed::key), Some(requested));
                prop_assert_eq!(b.as_ref().map(Keyed::key), Some(requested));
            }
            prop_assert_eq!(fetcher.calls(), 1);
        }
    }
}

#[test]
fn test_fetcher_contract_is_aligned() {
    let fetcher = directory();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime should build");
    let lookups = runtime
        .block_on(KeyFetcher::<User>::fetch(&fetcher, &[user_key(3), user_key(4)]))
        .expect("fetch should succeed");
    assert_eq!(lookups, vec![KeyLookup::Found(user("edsger", 72)), KeyLookup::NotFound]);
}
