//! Query cache orchestrator.
//!
//! Decides per call whether to read the cache, fetch on miss, and how to
//! write fetched results back (see the module docs of `cache` for the two
//! priming routes).

use std::sync::Arc;

use futures_util::future::{try_join, try_join_all};
use serde_json::Value;
use tessera_core::{
    caching_enabled, query_cache_key, resolve_ttl, CacheOptions, ConfigError, EntityKind, Expiry,
    OperationKind, QueryResult, QuerySpec, TesseraResult, Ttl,
};
use tracing::{debug, instrument};

use super::context::CacheContext;
use super::envelope::{marshal_query_result, unmarshal_query_result};
use super::fetch::{DecodingQueryFetcher, QueryFetcher};
use super::stats::CacheStats;
use super::traits::CacheableRecord;

/// One payload waiting to be primed.
struct PrimeEntry {
    key: String,
    payload: Value,
    kinds: Vec<EntityKind>,
}

/// Cache-or-fetch surface for queries.
#[derive(Clone)]
pub struct QueryCache {
    ctx: CacheContext,
    executor: Option<Arc<dyn QueryFetcher<Value>>>,
}

impl QueryCache {
    pub fn new(ctx: CacheContext) -> Self {
        Self {
            ctx,
            executor: None,
        }
    }

    /// Default executor used by [`QueryCache::get`].
    pub fn with_executor(mut self, executor: Arc<dyn QueryFetcher<Value>>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn stats(&self) -> CacheStats {
        self.ctx.query_stats().snapshot()
    }

    /// Get a query result, running the default executor on a miss.
    pub async fn get<T: CacheableRecord>(
        &self,
        query: &QuerySpec,
        options: &CacheOptions,
    ) -> TesseraResult<QueryResult<T>> {
        let executor = self
            .executor
            .clone()
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "query executor".to_string(),
            })?;
        self.get_with(query, options, &DecodingQueryFetcher::new(executor))
            .await
    }

    /// Get a query result, running `fetcher` on a miss.
    #[instrument(level = "debug", skip_all, fields(kinds = ?query.kinds()))]
    pub async fn get_with<T, F>(
        &self,
        query: &QuerySpec,
        options: &CacheOptions,
        fetcher: &F,
    ) -> TesseraResult<QueryResult<T>>
    where
        T: CacheableRecord,
        F: QueryFetcher<T> + ?Sized,
    {
        self.ctx.ensure_open()?;
        let stats = self.ctx.query_stats();
        let config = self.ctx.config();
        let ttl = resolve_ttl(config, options, OperationKind::Queries);

        if !caching_enabled(config, options, &ttl) {
            debug!("query cache bypassed");
            stats.record_fetch();
            return fetcher.fetch(query).await;
        }

        let key = query_cache_key(&config.prefix.queries, query)?;
        if let Some(payload) = self.ctx.manager().get(&key).await? {
            stats.record_hits(1);
            debug!(key = %key, "query cache hit");
            return unmarshal_query_result(payload);
        }

        stats.record_misses(1);
        debug!(key = %key, "query cache miss");

        stats.record_fetch();
        let result = fetcher.fetch(query).await?;

        let entry = PrimeEntry {
            key,
            payload: marshal_query_result(&result)?,
            kinds: query.kinds().to_vec(),
        };
        self.prime(vec![entry], &ttl).await?;

        Ok(result)
    }

    /// Cache-only lookup of one query.
    pub async fn read<T: CacheableRecord>(
        &self,
        query: &QuerySpec,
    ) -> TesseraResult<Option<QueryResult<T>>> {
        self.ctx.ensure_open()?;
        let key = query_cache_key(&self.ctx.config().prefix.queries, query)?;
        match self.ctx.manager().get(&key).await? {
            Some(payload) => {
                self.ctx.query_stats().record_hits(1);
                Ok(Some(unmarshal_query_result(payload)?))
            }
            None => {
                self.ctx.query_stats().record_misses(1);
                Ok(None)
            }
        }
    }

    /// Cached results for several queries.
    ///
    /// Queries with no cached entry are dropped; each found result is paired
    /// with the index of its query.
    pub async fn mget<T: CacheableRecord>(
        &self,
        queries: &[QuerySpec],
    ) -> TesseraResult<Vec<(usize, QueryResult<T>)>> {
        self.ctx.ensure_open()?;
        let keys = self.cache_keys(queries)?;
        let payloads = self.ctx.manager().mget(&keys).await?;

        let mut found = Vec::new();
        for (i, payload) in payloads.into_iter().enumerate() {
            if let Some(payload) = payload {
                found.push((i, unmarshal_query_result(payload)?));
            }
        }

        let stats = self.ctx.query_stats();
        stats.record_hits(found.len() as u64);
        stats.record_misses((queries.len() - found.len()) as u64);
        Ok(found)
    }

    /// Store a result for `query` without fetching.
    pub async fn set<T: CacheableRecord>(
        &self,
        query: &QuerySpec,
        result: &QueryResult<T>,
        options: &CacheOptions,
    ) -> TesseraResult<()> {
        self.mset(&[(query.clone(), result.clone())], options).await
    }

    /// Store results for several queries without fetching.
    ///
    /// Entries are routed like fetched results. Skipped when the resolved
    /// TTL is "never cache".
    pub async fn mset<T: CacheableRecord>(
        &self,
        entries: &[(QuerySpec, QueryResult<T>)],
        options: &CacheOptions,
    ) -> TesseraResult<()> {
        self.ctx.ensure_open()?;
        let config = self.ctx.config();
        let ttl = resolve_ttl(config, options, OperationKind::Queries);
        if ttl.is_no_cache() || entries.is_empty() {
            return Ok(());
        }

        let mut prime_entries = Vec::with_capacity(entries.len());
        for (query, result) in entries {
            prime_entries.push(PrimeEntry {
                key: query_cache_key(&config.prefix.queries, query)?,
                payload: marshal_query_result(result)?,
                kinds: query.kinds().to_vec(),
            });
        }
        self.prime(prime_entries, &ttl).await
    }

    /// Delete cached results for `queries`.
    ///
    /// Only the generic cache is touched; entity-kind sets keep listing the
    /// deleted keys until the kind is invalidated.
    pub async fn del(&self, queries: &[QuerySpec]) -> TesseraResult<u64> {
        self.ctx.ensure_open()?;
        let keys = self.cache_keys(queries)?;
        self.ctx.manager().del(&keys).await
    }

    /// Drop every query registered under `kinds`.
    pub async fn invalidate(&self, kinds: &[EntityKind]) -> TesseraResult<u64> {
        self.ctx.ensure_open()?;
        let deleted = self.ctx.index().invalidate(kinds).await?;
        self.ctx.query_stats().record_invalidation();
        Ok(deleted)
    }

    fn cache_keys(&self, queries: &[QuerySpec]) -> TesseraResult<Vec<String>> {
        let prefix = &self.ctx.config().prefix.queries;
        queries
            .iter()
            .map(|query| query_cache_key(prefix, query))
            .collect()
    }

    async fn prime(&self, entries: Vec<PrimeEntry>, ttl: &Ttl) -> TesseraResult<()> {
        let count = entries.len() as u64;

        match self.ctx.distributed() {
            Some(handle) if ttl.for_store(&handle.name) == Expiry::Forever => {
                debug!(
                    store = %handle.name,
                    entries = entries.len(),
                    "priming through entity-kind index"
                );
                let index = self.ctx.index();
                let registrations = try_join_all(entries.iter().map(|entry| {
                    index.register_query(&entry.key, &entry.payload, &entry.kinds, None)
                }));

                let local_entries: Vec<(String, Value)> = entries
                    .iter()
                    .map(|entry| (entry.key.clone(), entry.payload.clone()))
                    .collect();
                let local_stores = self.ctx.local_stores();
                let local_writes = try_join_all(
                    local_stores
                        .iter()
                        .map(|store| store.mset(&local_entries, ttl.for_store(store.name()))),
                );

                try_join(registrations, local_writes).await?;
            }
            _ => {
                debug!(entries = entries.len(), "priming through cache manager");
                let manager = self.ctx.manager();
                if let [entry] = entries.as_slice() {
                    manager.prime_cache(&entry.key, &entry.payload, ttl).await?;
                } else {
                    let pairs: Vec<(String, Value)> = entries
                        .into_iter()
                        .map(|entry| (entry.key, entry.payload))
                        .collect();
                    manager.mset(&pairs, ttl).await?;
                }
            }
        }

        self.ctx.query_stats().record_primes(count);
        Ok(())
    }
}
