//! In-process distributed store.
//!
//! Follows the Redis data model the entity-kind index relies on: string
//! values with optional expiry, string sets, and MULTI/EXEC batches that
//! apply all-or-nothing. Suitable for single-process deployments and tests;
//! use `RedisStore` (feature `redis`) to share the cache between processes.
//!
//! Expired strings read as absent and are dropped on access or by
//! [`InProcessDistributedStore::purge_expired`].

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tessera_core::{Expiry, StoreError, TesseraResult};
use tokio::sync::Mutex;
use tracing::debug;

use super::traits::{CacheStore, Command, DistributedStore, Reply};

#[derive(Debug, Clone)]
struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyType {
    String,
    Set,
}

#[derive(Debug, Default)]
struct State {
    strings: HashMap<String, StringEntry>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl State {
    fn key_type(&self, key: &str, now: Instant) -> Option<KeyType> {
        if self.sets.contains_key(key) {
            Some(KeyType::Set)
        } else if self.strings.get(key).is_some_and(|entry| entry.is_live(now)) {
            Some(KeyType::String)
        } else {
            None
        }
    }

    /// Reject a batch that would hit a WRONGTYPE error part way through.
    ///
    /// Only keys the batch touches are tracked, so the check costs the size
    /// of the batch rather than the size of the store.
    fn check(&self, commands: &[Command], now: Instant) -> TesseraResult<()> {
        let mut touched: HashMap<&str, Option<KeyType>> = HashMap::new();
        for command in commands {
            match command {
                Command::SAdd { key, .. } | Command::SMembers { key } => {
                    let current = match touched.get(key.as_str()) {
                        Some(kind) => *kind,
                        None => self.key_type(key, now),
                    };
                    if current == Some(KeyType::String) {
                        return Err(wrong_type(key));
                    }
                    if matches!(command, Command::SAdd { .. }) {
                        touched.insert(key, Some(KeyType::Set));
                    }
                }
                Command::Set { key, .. } | Command::SetEx { key, .. } => {
                    touched.insert(key, Some(KeyType::String));
                }
                Command::Del { keys } => {
                    for key in keys {
                        touched.insert(key, None);
                    }
                }
            }
        }
        Ok(())
    }

    fn get_string(&mut self, key: &str, now: Instant) -> TesseraResult<Option<String>> {
        if self.sets.contains_key(key) {
            return Err(wrong_type(key));
        }
        let expired = match self.strings.get(key) {
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.strings.remove(key);
        }
        Ok(None)
    }

    fn set_string(&mut self, key: &str, value: String, ttl: Option<Duration>, now: Instant) {
        self.sets.remove(key);
        self.strings.insert(
            key.to_string(),
            StringEntry {
                value,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
    }

    fn sadd(&mut self, key: &str, member: &str, now: Instant) -> TesseraResult<i64> {
        match self.strings.get(key) {
            Some(entry) if entry.is_live(now) => return Err(wrong_type(key)),
            Some(_) => {
                self.strings.remove(key);
            }
            None => {}
        }
        let added = self
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(i64::from(added))
    }

    fn smembers(&self, key: &str, now: Instant) -> TesseraResult<Vec<String>> {
        if self.key_type(key, now) == Some(KeyType::String) {
            return Err(wrong_type(key));
        }
        Ok(self
            .sets
            .get(key)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn del(&mut self, keys: &[String], now: Instant) -> u64 {
        let mut deleted = 0u64;
        for key in keys {
            if let Some(entry) = self.strings.remove(key) {
                if entry.is_live(now) {
                    deleted += 1;
                }
            } else if self.sets.remove(key).is_some() {
                deleted += 1;
            }
        }
        deleted
    }

    fn purge_expired(&mut self, now: Instant) -> u64 {
        let before = self.strings.len();
        self.strings.retain(|_, entry| entry.is_live(now));
        (before - self.strings.len()) as u64
    }

    fn apply(&mut self, command: &Command, now: Instant) -> TesseraResult<Reply> {
        match command {
            Command::SAdd { key, member } => self.sadd(key, member, now).map(Reply::Integer),
            Command::Set { key, value } => {
                self.set_string(key, value.clone(), None, now);
                Ok(Reply::Ok)
            }
            Command::SetEx {
                key,
                seconds,
                value,
            } => {
                self.set_string(key, value.clone(), Some(Duration::from_secs(*seconds)), now);
                Ok(Reply::Ok)
            }
            Command::SMembers { key } => self.smembers(key, now).map(Reply::Members),
            Command::Del { keys } => Ok(Reply::Integer(
                i64::try_from(self.del(keys, now)).unwrap_or(i64::MAX),
            )),
        }
    }
}

fn wrong_type(key: &str) -> tessera_core::TesseraError {
    StoreError::Transaction {
        reason: format!(
            "WRONGTYPE operation against key {} holding the wrong kind of value",
            key
        ),
    }
    .into()
}

/// Distributed store kept in process memory.
pub struct InProcessDistributedStore {
    name: String,
    state: Mutex<State>,
}

impl InProcessDistributedStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// True when `key` holds a live string or a set.
    pub async fn contains(&self, key: &str) -> bool {
        let state = self.state.lock().await;
        state.key_type(key, Instant::now()).is_some()
    }

    /// Remove every expired string, returning how many were dropped.
    pub async fn purge_expired(&self) -> u64 {
        let purged = self.state.lock().await.purge_expired(Instant::now());
        if purged > 0 {
            debug!(store = %self.name, purged, "purged expired entries");
        }
        purged
    }
}

#[async_trait]
impl CacheStore for InProcessDistributedStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_distributed(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> TesseraResult<Option<Value>> {
        let raw = self.state.lock().await.get_string(key, Instant::now())?;
        raw.map(|raw| {
            serde_json::from_str::<Value>(&raw).map_err(|e| {
                StoreError::Deserialization {
                    reason: e.to_string(),
                }
                .into()
            })
        })
        .transpose()
    }

    async fn set(&self, key: &str, value: &Value, expiry: Expiry) -> TesseraResult<()> {
        if !expiry.is_cacheable() {
            return Ok(());
        }
        self.state
            .lock()
            .await
            .set_string(key, value.to_string(), expiry.as_duration(), Instant::now());
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> TesseraResult<u64> {
        Ok(self.state.lock().await.del(keys, Instant::now()))
    }

    async fn close(&self) -> TesseraResult<()> {
        let mut state = self.state.lock().await;
        *state = State::default();
        Ok(())
    }
}

#[async_trait]
impl DistributedStore for InProcessDistributedStore {
    async fn exec(&self, commands: Vec<Command>) -> TesseraResult<Vec<Reply>> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        // Nothing is applied unless every command can succeed.
        state.check(&commands, now)?;
        let mut replies = Vec::with_capacity(commands.len());
        for command in &commands {
            replies.push(state.apply(command, now)?);
        }

        debug!(store = %self.name, commands = commands.len(), "executed batch");
        Ok(replies)
    }

    async fn smembers(&self, key: &str) -> TesseraResult<Vec<String>> {
        self.state.lock().await.smembers(key, Instant::now())
    }

    async fn del_keys(&self, keys: &[String]) -> TesseraResult<u64> {
        Ok(self.state.lock().await.del(keys, Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessera_core::TesseraError;

    #[tokio::test]
    async fn test_exec_batch_replies_in_order() {
        let store = InProcessDistributedStore::new("redis");
        let replies = store
            .exec(vec![
                Command::SAdd {
                    key: "kinds:User".to_string(),
                    member: "queries:a".to_string(),
                },
                Command::Set {
                    key: "queries:a".to_string(),
                    value: "[1]".to_string(),
                },
                Command::SMembers {
                    key: "kinds:User".to_string(),
                },
            ])
            .await
            .expect("exec should succeed");

        assert_eq!(
            replies,
            vec![
                Reply::Integer(1),
                Reply::Ok,
                Reply::Members(vec!["queries:a".to_string()])
            ]
        );
        assert_eq!(
            store.get("queries:a").await.expect("get should succeed"),
            Some(json!([1]))
        );
    }

    #[tokio::test]
    async fn test_failed_batch_applies_nothing() {
        let store = InProcessDistributedStore::new("redis");
        store
            .set("plain", &json!(1), Expiry::Forever)
            .await
            .expect("set should succeed");

        let err = store
            .exec(vec![
                Command::Set {
                    key: "other".to_string(),
                    value: "2".to_string(),
                },
                Command::SAdd {
                    key: "plain".to_string(),
                    member: "x".to_string(),
                },
            ])
            .await
            .expect_err("wrong type should fail");

        assert!(matches!(err, TesseraError::Store(StoreError::Transaction { .. })));
        assert!(!store.contains("other").await);
    }

    #[tokio::test]
    async fn test_del_keys_counts_strings_and_sets() {
        let store = InProcessDistributedStore::new("redis");
        store
            .exec(vec![
                Command::SAdd {
                    key: "kinds:User".to_string(),
                    member: "q1".to_string(),
                },
                Command::SetEx {
                    key: "q1".to_string(),
                    seconds: 60,
                    value: "{}".to_string(),
                },
            ])
            .await
            .expect("exec should succeed");

        let deleted = store
            .del_keys(&[
                "kinds:User".to_string(),
                "q1".to_string(),
                "missing".to_string(),
            ])
            .await
            .expect("del should succeed");
        assert_eq!(deleted, 2);
        assert!(store
            .smembers("kinds:User")
            .await
            .expect("smembers should succeed")
            .is_empty());
    }

    #[tokio::test]
    async fn test_no_cache_write_skipped() {
        let store = InProcessDistributedStore::new("redis");
        store
            .set("a", &json!(1), Expiry::NoCache)
            .await
            .expect("set should succeed");
        assert!(!store.contains("a").await);
    }

    #[tokio::test]
    async fn test_type_change_within_batch_is_checked() {
        let store = InProcessDistributedStore::new("redis");
        let err = store
            .exec(vec![
                Command::SAdd {
                    key: "kinds:User".to_string(),
                    member: "q1".to_string(),
                },
                Command::Set {
                    key: "kinds:User".to_string(),
                    value: "1".to_string(),
                },
                Command::SMembers {
                    key: "kinds:User".to_string(),
                },
            ])
            .await
            .expect_err("set then smembers should fail");
        assert!(matches!(err, TesseraError::Store(StoreError::Transaction { .. })));
        assert!(!store.contains("kinds:User").await);

        let replies = store
            .exec(vec![
                Command::Set {
                    key: "k".to_string(),
                    value: "1".to_string(),
                },
                Command::Del {
                    keys: vec!["k".to_string()],
                },
                Command::SAdd {
                    key: "k".to_string(),
                    member: "m".to_string(),
                },
            ])
            .await
            .expect("exec should succeed");
        assert_eq!(replies, vec![Reply::Ok, Reply::Integer(1), Reply::Integer(1)]);
    }

    #[tokio::test]
    async fn test_batches_stay_cheap_on_a_large_store() {
        let store = InProcessDistributedStore::new("redis");
        for i in 0..20_000 {
            store
                .set(&format!("queries:{}", i), &json!(i), Expiry::Forever)
                .await
                .expect("set should succeed");
        }

        let started = Instant::now();
        for i in 0..200 {
            store
                .exec(vec![
                    Command::SAdd {
                        key: "kinds:User".to_string(),
                        member: format!("queries:new:{}", i),
                    },
                    Command::Set {
                        key: format!("queries:new:{}", i),
                        value: "[]".to_string(),
                    },
                ])
                .await
                .expect("exec should succeed");
        }
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(
            store
                .smembers("kinds:User")
                .await
                .expect("smembers should succeed")
                .len(),
            200
        );
    }

    #[tokio::test]
    async fn test_purge_expired_drops_dead_strings() {
        let store = InProcessDistributedStore::new("redis");
        store
            .exec(vec![
                Command::SetEx {
                    key: "gone".to_string(),
                    seconds: 0,
                    value: "1".to_string(),
                },
                Command::SetEx {
                    key: "kept".to_string(),
                    seconds: 60,
                    value: "2".to_string(),
                },
                Command::SAdd {
                    key: "kinds:User".to_string(),
                    member: "kept".to_string(),
                },
            ])
            .await
            .expect("exec should succeed");

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.purge_expired().await, 0);
        assert!(store.contains("kept").await);
        assert!(store.contains("kinds:User").await);

        // An expired string no longer blocks reuse of its key as a set.
        store
            .exec(vec![
                Command::SetEx {
                    key: "reused".to_string(),
                    seconds: 0,
                    value: "1".to_string(),
                },
            ])
            .await
            .expect("exec should succeed");
        store
            .exec(vec![Command::SAdd {
                key: "reused".to_string(),
                member: "m".to_string(),
            }])
            .await
            .expect("sadd on expired string should succeed");
    }
}
