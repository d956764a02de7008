//! Redis-backed distributed store.
//!
//! Values are stored as JSON strings. Batches run as one MULTI/EXEC
//! pipeline over a shared [`ConnectionManager`].

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use serde_json::Value;
use tessera_core::{Expiry, StoreError, TesseraError, TesseraResult};
use tracing::debug;

use super::traits::{CacheStore, Command, DistributedStore, Reply};

/// Distributed store over a Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    name: String,
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `url` (for example `redis://127.0.0.1/`).
    pub async fn connect(name: impl Into<String>, url: &str) -> TesseraResult<Self> {
        let name = name.into();
        let client = redis::Client::open(url).map_err(|e| transport(&name, e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| transport(&name, e))?;
        debug!(store = %name, "connected to redis");
        Ok(Self { name, conn })
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(name: impl Into<String>, conn: ConnectionManager) -> Self {
        Self {
            name: name.into(),
            conn,
        }
    }

    fn transport(&self, err: RedisError) -> TesseraError {
        transport(&self.name, err)
    }
}

fn transport(store: &str, err: RedisError) -> TesseraError {
    StoreError::Transport {
        store: store.to_string(),
        reason: err.to_string(),
    }
    .into()
}

fn decode(raw: Option<String>) -> TesseraResult<Option<Value>> {
    raw.map(|s| {
        serde_json::from_str::<Value>(&s).map_err(|e| {
            TesseraError::from(StoreError::Deserialization {
                reason: e.to_string(),
            })
        })
    })
    .transpose()
}

#[async_trait]
impl CacheStore for RedisStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_distributed(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> TesseraResult<Option<Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await.map_err(|e| self.transport(e))?;
        decode(raw)
    }

    async fn mget(&self, keys: &[String]) -> TesseraResult<Vec<Option<Value>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.transport(e))?;
        raw.into_iter().map(decode).collect()
    }

    async fn set(&self, key: &str, value: &Value, expiry: Expiry) -> TesseraResult<()> {
        self.mset(&[(key.to_string(), value.clone())], expiry).await
    }

    async fn mset(&self, entries: &[(String, Value)], expiry: Expiry) -> TesseraResult<()> {
        if entries.is_empty() || !expiry.is_cacheable() {
            return Ok(());
        }
        let commands = entries
            .iter()
            .map(|(key, value)| match expiry {
                Expiry::Seconds(seconds) => Command::SetEx {
                    key: key.clone(),
                    seconds,
                    value: value.to_string(),
                },
                _ => Command::Set {
                    key: key.clone(),
                    value: value.to_string(),
                },
            })
            .collect();
        self.exec(commands).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> TesseraResult<u64> {
        self.del_keys(keys).await
    }
}

#[async_trait]
impl DistributedStore for RedisStore {
    async fn exec(&self, commands: Vec<Command>) -> TesseraResult<Vec<Reply>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in &commands {
            match command {
                Command::SAdd { key, member } => {
                    pipe.sadd(key, member);
                }
                Command::Set { key, value } => {
                    pipe.set(key, value);
                }
                Command::SetEx {
                    key,
                    seconds,
                    value,
                } => {
                    pipe.set_ex(key, value, *seconds);
                }
                Command::SMembers { key } => {
                    pipe.smembers(key);
                }
                Command::Del { keys } => {
                    pipe.del(keys);
                }
            }
        }

        let mut conn = self.conn.clone();
        let values: Vec<redis::Value> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| self.transport(e))?;

        if values.len() != commands.len() {
            return Err(StoreError::Transaction {
                reason: format!(
                    "expected {} replies, got {}",
                    commands.len(),
                    values.len()
                ),
            }
            .into());
        }

        let replies = commands
            .iter()
            .zip(values)
            .map(|(command, value)| match command {
                Command::Set { .. } | Command::SetEx { .. } => Ok(Reply::Ok),
                Command::SAdd { .. } | Command::Del { .. } => redis::from_redis_value::<i64>(&value)
                    .map(Reply::Integer)
                    .map_err(|e| self.transport(e)),
                Command::SMembers { .. } => redis::from_redis_value::<Vec<String>>(&value)
                    .map(Reply::Members)
                    .map_err(|e| self.transport(e)),
            })
            .collect::<TesseraResult<Vec<Reply>>>()?;

        debug!(store = %self.name, commands = replies.len(), "executed redis batch");
        Ok(replies)
    }

    async fn smembers(&self, key: &str) -> TesseraResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.smembers(key).await.map_err(|e| self.transport(e))
    }

    async fn del_keys(&self, keys: &[String]) -> TesseraResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        conn.del(keys).await.map_err(|e| self.transport(e))
    }
}
