//! Shared cache context.
//!
//! A `CacheContext` is configured once, handed to every component that
//! caches, and disposed explicitly. Clones share the same state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tessera_core::{CacheConfig, ConfigError, TesseraResult};
use tracing::{debug, info};

use super::key_cache::KeyCache;
use super::kind_index::EntityKindIndex;
use super::manager::MultiStoreCacheManager;
use super::query_cache::QueryCache;
use super::stats::StatsRecorder;
use super::traits::{CacheManager, CacheStore, DistributedStore};

/// Name and client of the distributed store.
#[derive(Clone)]
pub(crate) struct DistributedHandle {
    pub(crate) name: String,
    pub(crate) client: Arc<dyn DistributedStore>,
}

struct ContextInner {
    config: CacheConfig,
    manager: Arc<dyn CacheManager>,
    distributed: Option<DistributedHandle>,
    index: EntityKindIndex,
    query_stats: StatsRecorder,
    key_stats: StatsRecorder,
    disposed: AtomicBool,
}

/// Handle to the configured cache manager and its collaborators.
#[derive(Clone)]
pub struct CacheContext {
    inner: Arc<ContextInner>,
}

impl CacheContext {
    pub fn builder(config: CacheConfig) -> CacheContextBuilder {
        CacheContextBuilder::new(config)
    }

    /// Effective configuration, with `stores` filled from the manager.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn manager(&self) -> &Arc<dyn CacheManager> {
        &self.inner.manager
    }

    pub fn index(&self) -> &EntityKindIndex {
        &self.inner.index
    }

    /// Name of the distributed store, if one is configured.
    pub fn distributed_store_name(&self) -> Option<&str> {
        self.inner
            .distributed
            .as_ref()
            .map(|handle| handle.name.as_str())
    }

    pub(crate) fn distributed(&self) -> Option<&DistributedHandle> {
        self.inner.distributed.as_ref()
    }

    pub(crate) fn query_stats(&self) -> &StatsRecorder {
        &self.inner.query_stats
    }

    pub(crate) fn key_stats(&self) -> &StatsRecorder {
        &self.inner.key_stats
    }

    /// Stores other than the distributed one.
    pub(crate) fn local_stores(&self) -> Vec<Arc<dyn CacheStore>> {
        let distributed = self.distributed_store_name();
        self.inner
            .manager
            .stores()
            .into_iter()
            .filter(|info| !info.distributed && Some(info.name.as_str()) != distributed)
            .filter_map(|info| self.inner.manager.store(&info.name))
            .collect()
    }

    /// Query cache bound to this context.
    pub fn queries(&self) -> QueryCache {
        QueryCache::new(self.clone())
    }

    /// Key cache bound to this context.
    pub fn keys(&self) -> KeyCache {
        KeyCache::new(self.clone())
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> TesseraResult<()> {
        if self.is_disposed() {
            return Err(ConfigError::Disposed.into());
        }
        Ok(())
    }

    /// Close every store. Later operations fail with `ConfigError::Disposed`.
    pub async fn dispose(&self) -> TesseraResult<()> {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.manager.close().await?;
        info!("cache context disposed");
        Ok(())
    }
}

/// Builder for [`CacheContext`].
pub struct CacheContextBuilder {
    config: CacheConfig,
    stores: Vec<Arc<dyn CacheStore>>,
    manager: Option<Arc<dyn CacheManager>>,
    distributed: Option<DistributedHandle>,
}

impl CacheContextBuilder {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            stores: Vec::new(),
            manager: None,
            distributed: None,
        }
    }

    /// Add a store. Stores are read in the order they are added.
    pub fn store<S: CacheStore + 'static>(mut self, store: Arc<S>) -> Self {
        self.stores.push(store);
        self
    }

    /// Add the distributed store, which also backs the entity-kind index.
    pub fn distributed_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: CacheStore + DistributedStore + 'static,
    {
        self.distributed = Some(DistributedHandle {
            name: store.name().to_string(),
            client: store.clone(),
        });
        self.stores.push(store);
        self
    }

    /// Use a custom manager instead of a [`MultiStoreCacheManager`] over the
    /// added stores.
    pub fn with_manager(mut self, manager: Arc<dyn CacheManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Attach the client of a distributed store managed by a custom manager.
    pub fn distributed_client(
        mut self,
        name: impl Into<String>,
        client: Arc<dyn DistributedStore>,
    ) -> Self {
        self.distributed = Some(DistributedHandle {
            name: name.into(),
            client,
        });
        self
    }

    pub fn build(self) -> TesseraResult<CacheContext> {
        let mut config = self.config;
        config.validate()?;

        let manager: Arc<dyn CacheManager> = match self.manager {
            Some(manager) => {
                if !self.stores.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "stores".to_string(),
                        value: self.stores.len().to_string(),
                        reason: "stores cannot be added next to a custom manager".to_string(),
                    }
                    .into());
                }
                manager
            }
            None => Arc::new(MultiStoreCacheManager::new(self.stores)),
        };

        config.stores = manager.stores().into_iter().map(|info| info.name).collect();
        if config.stores.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "stores".to_string(),
            }
            .into());
        }

        if let Some(handle) = &self.distributed {
            if !config.stores.contains(&handle.name) {
                return Err(ConfigError::InvalidValue {
                    field: "distributed".to_string(),
                    value: handle.name.clone(),
                    reason: "not one of the manager's stores".to_string(),
                }
                .into());
            }
        }

        let index = EntityKindIndex::new(
            self.distributed.as_ref().map(|handle| handle.client.clone()),
            config.prefix.kind_sets.clone(),
        );

        debug!(
            stores = ?config.stores,
            distributed = ?self.distributed.as_ref().map(|handle| handle.name.as_str()),
            "cache context configured"
        );

        Ok(CacheContext {
            inner: Arc::new(ContextInner {
                config,
                manager,
                distributed: self.distributed,
                index,
                query_stats: StatsRecorder::default(),
                key_stats: StatsRecorder::default(),
                disposed: AtomicBool::new(false),
            }),
        })
    }
}
