//! Key cache orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tessera_core::{
    caching_enabled, key_cache_key, resolve_ttl, stringify_key, CacheOptions, ConfigError,
    DatastoreKey, FetchError, KeyLookup, Keyed, OperationKind, TesseraResult, Ttl,
};
use tracing::{debug, instrument, warn};

use super::context::CacheContext;
use super::envelope::{marshal_record, unmarshal_record};
use super::fetch::{DecodingKeyFetcher, KeyFetcher};
use super::stats::CacheStats;
use super::traits::CacheableRecord;

/// Cache-or-fetch surface for point-key lookups.
#[derive(Clone)]
pub struct KeyCache {
    ctx: CacheContext,
    loader: Option<Arc<dyn KeyFetcher<Value>>>,
}

impl KeyCache {
    pub fn new(ctx: CacheContext) -> Self {
        Self { ctx, loader: None }
    }

    /// Default loader used by [`KeyCache::wrap`] and [`KeyCache::wrap_one`].
    pub fn with_loader(mut self, loader: Arc<dyn KeyFetcher<Value>>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn stats(&self) -> CacheStats {
        self.ctx.key_stats().snapshot()
    }

    fn default_loader(&self) -> TesseraResult<DecodingKeyFetcher> {
        let loader = self
            .loader
            .clone()
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "key loader".to_string(),
            })?;
        Ok(DecodingKeyFetcher::new(loader))
    }

    /// Load `keys` through the cache with the default loader.
    pub async fn wrap<T: CacheableRecord>(
        &self,
        keys: &[DatastoreKey],
        options: &CacheOptions,
    ) -> TesseraResult<Vec<Option<Keyed<T>>>> {
        let loader = self.default_loader()?;
        self.wrap_with(keys, options, &loader).await
    }

    /// Load `keys` through the cache, fetching misses with `fetcher`.
    ///
    /// The result is aligned with `keys`; `None` marks a key the datastore
    /// does not hold. Only keys missing from the cache are fetched, in one
    /// batch, and duplicates are fetched once.
    #[instrument(level = "debug", skip_all, fields(keys = keys.len()))]
    pub async fn wrap_with<T, F>(
        &self,
        keys: &[DatastoreKey],
        options: &CacheOptions,
        fetcher: &F,
    ) -> TesseraResult<Vec<Option<Keyed<T>>>>
    where
        T: CacheableRecord,
        F: KeyFetcher<T> + ?Sized,
    {
        self.ctx.ensure_open()?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let stats = self.ctx.key_stats();
        let config = self.ctx.config();
        let ttl = resolve_ttl(config, options, OperationKind::Keys);

        if !caching_enabled(config, options, &ttl) {
            debug!("key cache bypassed");
            stats.record_fetch();
            let lookups = fetch_aligned(fetcher, keys).await?;
            return Ok(keys
                .iter()
                .cloned()
                .zip(lookups)
                .map(|(key, lookup)| lookup.into_option().map(|value| Keyed::new(value, key)))
                .collect());
        }

        let cache_keys = self.cache_keys(keys)?;
        let cached = self.ctx.manager().mget(&cache_keys).await?;

        let mut results: Vec<Option<Keyed<T>>> = Vec::with_capacity(keys.len());
        let mut missing: Vec<usize> = Vec::new();
        for (i, payload) in cached.into_iter().enumerate() {
            match payload {
                Some(payload) => results.push(Some(unmarshal_record(payload)?)),
                None => {
                    results.push(None);
                    missing.push(i);
                }
            }
        }

        stats.record_hits((keys.len() - missing.len()) as u64);
        stats.record_misses(missing.len() as u64);
        if missing.is_empty() {
            return Ok(results);
        }

        // First position of every distinct missing cache key.
        let mut slot_of: HashMap<&str, usize> = HashMap::new();
        let mut to_fetch: Vec<usize> = Vec::new();
        for &i in &missing {
            slot_of.entry(cache_keys[i].as_str()).or_insert_with(|| {
                to_fetch.push(i);
                to_fetch.len() - 1
            });
        }

        let fetch_keys: Vec<DatastoreKey> = to_fetch.iter().map(|&i| keys[i].clone()).collect();
        debug!(fetching = fetch_keys.len(), "key cache miss");
        stats.record_fetch();
        let lookups = fetch_aligned(fetcher, &fetch_keys).await?;

        let fetched: Vec<Option<Keyed<T>>> = fetch_keys
            .into_iter()
            .zip(lookups)
            .map(|(key, lookup)| lookup.into_option().map(|value| Keyed::new(value, key)))
            .collect();

        let mut to_prime: Vec<(String, Value)> = Vec::new();
        for (slot, &i) in to_fetch.iter().enumerate() {
            if let Some(record) = &fetched[slot] {
                to_prime.push((
                    cache_keys[i].clone(),
                    marshal_record(record.value(), record.key())?,
                ));
            }
        }

        for &i in &missing {
            let slot = slot_of[cache_keys[i].as_str()];
            results[i] = fetched[slot].clone();
        }

        if !to_prime.is_empty() {
            self.ctx.manager().mset(&to_prime, &ttl).await?;
            stats.record_primes(to_prime.len() as u64);
        }

        Ok(results)
    }

    /// Load one key with the default loader.
    pub async fn wrap_one<T: CacheableRecord>(
        &self,
        key: &DatastoreKey,
        options: &CacheOptions,
    ) -> TesseraResult<Keyed<T>> {
        let loader = self.default_loader()?;
        self.wrap_one_with(key, options, &loader).await
    }

    /// Load one key, failing with [`FetchError::NotFound`] when the
    /// datastore does not hold it.
    pub async fn wrap_one_with<T, F>(
        &self,
        key: &DatastoreKey,
        options: &CacheOptions,
        fetcher: &F,
    ) -> TesseraResult<Keyed<T>>
    where
        T: CacheableRecord,
        F: KeyFetcher<T> + ?Sized,
    {
        let mut results = self
            .wrap_with(std::slice::from_ref(key), options, fetcher)
            .await?;
        match results.pop().flatten() {
            Some(record) => Ok(record),
            None => Err(FetchError::NotFound {
                key: stringify_key(key)?,
            }
            .into()),
        }
    }

    /// Cached record for `key`.
    pub async fn get<T: CacheableRecord>(
        &self,
        key: &DatastoreKey,
    ) -> TesseraResult<Option<Keyed<T>>> {
        self.ctx.ensure_open()?;
        let cache_key = key_cache_key(&self.ctx.config().prefix.keys, key)?;
        match self.ctx.manager().get(&cache_key).await? {
            Some(payload) => {
                self.ctx.key_stats().record_hits(1);
                Ok(Some(unmarshal_record(payload)?))
            }
            None => {
                self.ctx.key_stats().record_misses(1);
                Ok(None)
            }
        }
    }

    /// Cached records for `keys`, aligned with the input.
    pub async fn mget<T: CacheableRecord>(
        &self,
        keys: &[DatastoreKey],
    ) -> TesseraResult<Vec<Option<Keyed<T>>>> {
        self.ctx.ensure_open()?;
        let cache_keys = self.cache_keys(keys)?;
        let payloads = self.ctx.manager().mget(&cache_keys).await?;

        let records = payloads
            .into_iter()
            .map(|payload| payload.map(unmarshal_record).transpose())
            .collect::<TesseraResult<Vec<Option<Keyed<T>>>>>()?;

        let hits = records.iter().filter(|r| r.is_some()).count() as u64;
        let stats = self.ctx.key_stats();
        stats.record_hits(hits);
        stats.record_misses(keys.len() as u64 - hits);
        Ok(records)
    }

    /// Store `value` under `key`. Skipped when the resolved TTL is "never
    /// cache".
    pub async fn set<T: CacheableRecord>(
        &self,
        key: &DatastoreKey,
        value: &T,
        options: &CacheOptions,
    ) -> TesseraResult<()> {
        self.ctx.ensure_open()?;
        let Some(ttl) = self.write_ttl(options) else {
            return Ok(());
        };
        let cache_key = key_cache_key(&self.ctx.config().prefix.keys, key)?;
        let payload = marshal_record(value, key)?;
        self.ctx.manager().set(&cache_key, &payload, &ttl).await
    }

    pub async fn mset<T: CacheableRecord>(
        &self,
        entries: &[(DatastoreKey, T)],
        options: &CacheOptions,
    ) -> TesseraResult<()> {
        self.ctx.ensure_open()?;
        let Some(ttl) = self.write_ttl(options) else {
            return Ok(());
        };
        let prefix = &self.ctx.config().prefix.keys;
        let pairs = entries
            .iter()
            .map(|(key, value)| Ok((key_cache_key(prefix, key)?, marshal_record(value, key)?)))
            .collect::<TesseraResult<Vec<(String, Value)>>>()?;
        self.ctx.manager().mset(&pairs, &ttl).await
    }

    pub async fn del(&self, keys: &[DatastoreKey]) -> TesseraResult<u64> {
        self.ctx.ensure_open()?;
        let cache_keys = self.cache_keys(keys)?;
        let deleted = self.ctx.manager().del(&cache_keys).await?;
        debug!(requested = keys.len(), deleted, "deleted cached keys");
        Ok(deleted)
    }

    fn write_ttl(&self, options: &CacheOptions) -> Option<Ttl> {
        let ttl = resolve_ttl(self.ctx.config(), options, OperationKind::Keys);
        (!ttl.is_no_cache()).then_some(ttl)
    }

    fn cache_keys(&self, keys: &[DatastoreKey]) -> TesseraResult<Vec<String>> {
        let prefix = &self.ctx.config().prefix.keys;
        keys.iter().map(|key| key_cache_key(prefix, key)).collect()
    }
}

/// Run `fetcher` and check that it answered every key.
async fn fetch_aligned<T, F>(fetcher: &F, keys: &[DatastoreKey]) -> TesseraResult<Vec<KeyLookup<T>>>
where
    T: CacheableRecord,
    F: KeyFetcher<T> + ?Sized,
{
    let lookups = fetcher.fetch(keys).await?;
    if lookups.len() != keys.len() {
        warn!(
            requested = keys.len(),
            returned = lookups.len(),
            "key fetcher returned a misaligned batch"
        );
        return Err(FetchError::Failed {
            reason: format!(
                "fetcher returned {} results for {} keys",
                lookups.len(),
                keys.len()
            ),
        }
        .into());
    }
    Ok(lookups)
}
