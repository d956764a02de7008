//! Fetch handlers invoked on cache misses.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tessera_core::{
    DatastoreKey, FetchError, KeyLookup, Keyed, QueryResult, QuerySpec, TesseraResult,
};

/// Runs a query against the datastore.
#[async_trait]
pub trait QueryFetcher<T: Send>: Send + Sync {
    async fn fetch(&self, query: &QuerySpec) -> TesseraResult<QueryResult<T>>;
}

/// Loads entities by key.
///
/// The returned vector must be aligned with `keys`. A key that does not
/// exist yields [`KeyLookup::NotFound`]; an `Err` fails the whole batch.
#[async_trait]
pub trait KeyFetcher<T: Send>: Send + Sync {
    async fn fetch(&self, keys: &[DatastoreKey]) -> TesseraResult<Vec<KeyLookup<T>>>;
}

/// Closure adapter for [`QueryFetcher`].
///
/// ```ignore
/// let fetcher = FnQueryFetcher::new(|query: QuerySpec| async move {
///     datastore.run_query(&query).await
/// });
/// ```
pub struct FnQueryFetcher<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnQueryFetcher<F, Fut> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> QueryFetcher<T> for FnQueryFetcher<F, Fut>
where
    T: Send + 'static,
    F: Fn(QuerySpec) -> Fut + Send + Sync,
    Fut: Future<Output = TesseraResult<QueryResult<T>>> + Send,
{
    async fn fetch(&self, query: &QuerySpec) -> TesseraResult<QueryResult<T>> {
        (self.f)(query.clone()).await
    }
}

/// Closure adapter for [`KeyFetcher`].
pub struct FnKeyFetcher<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnKeyFetcher<F, Fut> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> KeyFetcher<T> for FnKeyFetcher<F, Fut>
where
    T: Send + 'static,
    F: Fn(Vec<DatastoreKey>) -> Fut + Send + Sync,
    Fut: Future<Output = TesseraResult<Vec<KeyLookup<T>>>> + Send,
{
    async fn fetch(&self, keys: &[DatastoreKey]) -> TesseraResult<Vec<KeyLookup<T>>> {
        (self.f)(keys.to_vec()).await
    }
}

/// Adapts an untyped default executor to a typed fetcher.
pub(crate) struct DecodingQueryFetcher {
    inner: Arc<dyn QueryFetcher<Value>>,
}

impl DecodingQueryFetcher {
    pub(crate) fn new(inner: Arc<dyn QueryFetcher<Value>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T> QueryFetcher<T> for DecodingQueryFetcher
where
    T: DeserializeOwned + Send + 'static,
{
    async fn fetch(&self, query: &QuerySpec) -> TesseraResult<QueryResult<T>> {
        let raw = self.inner.fetch(query).await?;
        let mut entities = Vec::with_capacity(raw.entities.len());
        for record in raw.entities {
            let (value, key) = record.into_parts();
            entities.push(Keyed::new(decode(value)?, key));
        }
        Ok(QueryResult::new(entities, raw.info))
    }
}

/// Adapts an untyped default entity loader to a typed fetcher.
pub(crate) struct DecodingKeyFetcher {
    inner: Arc<dyn KeyFetcher<Value>>,
}

impl DecodingKeyFetcher {
    pub(crate) fn new(inner: Arc<dyn KeyFetcher<Value>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T> KeyFetcher<T> for DecodingKeyFetcher
where
    T: DeserializeOwned + Send + 'static,
{
    async fn fetch(&self, keys: &[DatastoreKey]) -> TesseraResult<Vec<KeyLookup<T>>> {
        let raw = self.inner.fetch(keys).await?;
        let mut lookups = Vec::with_capacity(raw.len());
        for lookup in raw {
            lookups.push(match lookup {
                KeyLookup::Found(value) => KeyLookup::Found(decode(value)?),
                KeyLookup::NotFound => KeyLookup::NotFound,
            });
        }
        Ok(lookups)
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> TesseraResult<T> {
    serde_json::from_value(value).map_err(|e| {
        FetchError::Failed {
            reason: format!("fetched record has unexpected shape: {}", e),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use tessera_core::{QueryInfo, TesseraError};

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Item {
        name: String,
    }

    #[tokio::test]
    async fn test_fn_query_fetcher() {
        let fetcher = FnQueryFetcher::new(|query: QuerySpec| async move {
            let key = DatastoreKey::new(query.kinds()[0].clone(), 1);
            Ok::<_, TesseraError>(QueryResult::new(
                vec![Keyed::new(7u32, key)],
                QueryInfo::default(),
            ))
        });

        let result: QueryResult<u32> = fetcher
            .fetch(&QuerySpec::new("Item"))
            .await
            .expect("fetch should succeed");
        assert_eq!(*result.entities[0], 7);
    }

    #[tokio::test]
    async fn test_decoding_key_fetcher() {
        let raw: Arc<dyn KeyFetcher<Value>> =
            Arc::new(FnKeyFetcher::new(|keys: Vec<DatastoreKey>| async move {
                Ok::<_, TesseraError>(keys
                    .iter()
                    .map(|key| match key.id() {
                        Some(tessera_core::KeyId::Id(1)) => {
                            KeyLookup::Found(json!({"name": "first"}))
                        }
                        _ => KeyLookup::NotFound,
                    })
                    .collect::<Vec<KeyLookup<Value>>>())
            }));

        let fetcher = DecodingKeyFetcher::new(raw);
        let lookups: Vec<KeyLookup<Item>> = fetcher
            .fetch(&[DatastoreKey::new("Item", 1), DatastoreKey::new("Item", 2)])
            .await
            .expect("fetch should succeed");

        assert_eq!(
            lookups,
            vec![
                KeyLookup::Found(Item {
                    name: "first".to_string()
                }),
                KeyLookup::NotFound
            ]
        );
    }

    #[tokio::test]
    async fn test_decoding_rejects_bad_shape() {
        let raw: Arc<dyn QueryFetcher<Value>> =
            Arc::new(FnQueryFetcher::new(|_query: QuerySpec| async move {
                Ok::<_, TesseraError>(QueryResult::new(
                    vec![Keyed::new(json!(42), DatastoreKey::new("Item", 1))],
                    QueryInfo::default(),
                ))
            }));

        let fetcher = DecodingQueryFetcher::new(raw);
        let result: TesseraResult<QueryResult<Item>> = fetcher.fetch(&QuerySpec::new("Item")).await;
        assert!(matches!(
            result,
            Err(TesseraError::Fetch(FetchError::Failed { .. }))
        ));
    }
}
