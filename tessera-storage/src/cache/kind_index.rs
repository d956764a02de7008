//! Entity-kind invalidation index.
//!
//! For every entity kind, the distributed store holds a set with the cache
//! keys of every query registered under that kind. Invalidating a kind
//! deletes the set and every key it lists in one batch.
//!
//! Registration and invalidation are each one MULTI/EXEC transaction, but
//! they do not exclude each other: a query registered while an invalidation
//! of the same kind is in flight may miss the membership snapshot and
//! survive it.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tessera_core::{kind_set_key, ConfigError, EntityKind, StoreError, TesseraResult};
use tracing::{debug, info, warn};

use super::traits::{Command, DistributedStore, Reply};

/// Per-kind index of query cache keys.
#[derive(Clone)]
pub struct EntityKindIndex {
    client: Option<Arc<dyn DistributedStore>>,
    kind_set_prefix: String,
}

impl EntityKindIndex {
    pub fn new(client: Option<Arc<dyn DistributedStore>>, kind_set_prefix: impl Into<String>) -> Self {
        Self {
            client,
            kind_set_prefix: kind_set_prefix.into(),
        }
    }

    /// True when a distributed store backs this index.
    pub fn is_available(&self) -> bool {
        self.client.is_some()
    }

    /// Key of the set tracking `kind`.
    pub fn set_key(&self, kind: &EntityKind) -> String {
        kind_set_key(&self.kind_set_prefix, kind)
    }

    fn client(&self) -> TesseraResult<&Arc<dyn DistributedStore>> {
        self.client
            .as_ref()
            .ok_or_else(|| ConfigError::NoDistributedStore.into())
    }

    /// Register `cache_key` under every kind and write its payload.
    ///
    /// Both happen in one transaction. With `ttl_secs` of `None` the payload
    /// never expires.
    pub async fn register_query(
        &self,
        cache_key: &str,
        payload: &Value,
        kinds: &[EntityKind],
        ttl_secs: Option<u64>,
    ) -> TesseraResult<()> {
        let client = self.client()?;

        let mut commands: Vec<Command> = kinds
            .iter()
            .map(|kind| Command::SAdd {
                key: self.set_key(kind),
                member: cache_key.to_string(),
            })
            .collect();
        commands.push(match ttl_secs {
            Some(seconds) => Command::SetEx {
                key: cache_key.to_string(),
                seconds,
                value: payload.to_string(),
            },
            None => Command::Set {
                key: cache_key.to_string(),
                value: payload.to_string(),
            },
        });

        client.exec(commands).await.map_err(|e| {
            warn!(key = %cache_key, error = %e, "query registration failed");
            e
        })?;

        debug!(key = %cache_key, kinds = kinds.len(), "registered query");
        Ok(())
    }

    /// Delete every query registered under `kinds`, plus the kind sets.
    ///
    /// Returns the number of keys the store reports as deleted.
    pub async fn invalidate(&self, kinds: &[EntityKind]) -> TesseraResult<u64> {
        let client = self.client()?;
        if kinds.is_empty() {
            return Ok(0);
        }

        let set_keys: Vec<String> = kinds.iter().map(|kind| self.set_key(kind)).collect();
        let replies = client
            .exec(
                set_keys
                    .iter()
                    .map(|key| Command::SMembers { key: key.clone() })
                    .collect(),
            )
            .await?;

        let mut doomed: BTreeSet<String> = set_keys.into_iter().collect();
        for reply in replies {
            match reply {
                Reply::Members(members) => doomed.extend(members),
                other => {
                    return Err(StoreError::Transaction {
                        reason: format!("unexpected reply to SMEMBERS: {:?}", other),
                    }
                    .into())
                }
            }
        }

        let keys: Vec<String> = doomed.into_iter().collect();
        let deleted = client.del_keys(&keys).await?;

        info!(kinds = kinds.len(), deleted, "invalidated entity kinds");
        Ok(deleted)
    }
}
