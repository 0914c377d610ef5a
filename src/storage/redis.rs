//! Redis storage backend (feature `redis`).
//!
//! Documents live in per-collection hashes (`agentpay:{collection}`) as JSON
//! strings; counters live in plain keys (`agentpay:{collection}:{key}`) so
//! `INCRBYFLOAT` provides the single-writer atomic increment the guard
//! reservations depend on.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;
use tokio::sync::OnceCell;

use super::StorageBackend;
use crate::error::{Error, Result};

const KEY_PREFIX: &str = "agentpay";

/// Redis-backed storage. Safe across multiple orchestrator instances.
pub struct RedisStorage {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
}

impl RedisStorage {
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Configuration(format!("bad redis url: {e}")))?;
        Ok(RedisStorage {
            client,
            connection: OnceCell::new(),
        })
    }

    async fn conn(&self) -> Result<ConnectionManager> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(|e| Error::Storage(format!("redis connect: {e}")))
            })
            .await?;
        Ok(manager.clone())
    }

    fn hash_key(collection: &str) -> String {
        format!("{KEY_PREFIX}:{collection}")
    }

    fn counter_key(collection: &str, key: &str) -> String {
        format!("{KEY_PREFIX}:{collection}:{key}")
    }

    fn matches(doc: &Value, filters: &Map<String, Value>) -> bool {
        filters
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }
}

fn storage_err(e: redis::RedisError) -> Error {
    Error::Storage(format!("redis: {e}"))
}

#[async_trait]
impl StorageBackend for RedisStorage {
    async fn save(&self, collection: &str, key: &str, value: Value) -> Result<()> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(&value)?;
        let _: () = conn
            .hset(Self::hash_key(collection), key, payload)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn
            .hget(Self::hash_key(collection), key)
            .await
            .map_err(storage_err)?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => {
                // Counters are plain keys, not hash members.
                let counter: Option<String> = conn
                    .get(Self::counter_key(collection, key))
                    .await
                    .map_err(storage_err)?;
                Ok(counter.map(Value::String))
            }
        }
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn
            .hdel(Self::hash_key(collection), key)
            .await
            .map_err(storage_err)?;
        let removed_counter: i64 = conn
            .del(Self::counter_key(collection, key))
            .await
            .map_err(storage_err)?;
        Ok(removed > 0 || removed_counter > 0)
    }

    async fn query(
        &self,
        collection: &str,
        filters: &Map<String, Value>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Value>> {
        let mut conn = self.conn().await?;
        let raw: Vec<(String, String)> = conn
            .hgetall(Self::hash_key(collection))
            .await
            .map_err(storage_err)?;
        let mut results = Vec::new();
        for (_, json) in raw {
            let doc: Value = serde_json::from_str(&json)?;
            if Self::matches(&doc, filters) {
                results.push(doc);
            }
        }
        let results: Vec<Value> = results.into_iter().skip(offset).collect();
        Ok(match limit {
            Some(n) => results.into_iter().take(n).collect(),
            None => results,
        })
    }

    async fn update(&self, collection: &str, key: &str, patch: Map<String, Value>) -> Result<bool> {
        let Some(mut doc) = self.get(collection, key).await? else {
            return Ok(false);
        };
        if let Value::Object(existing) = &mut doc {
            for (field, value) in patch {
                existing.insert(field, value);
            }
        } else {
            doc = Value::Object(patch);
        }
        self.save(collection, key, doc).await?;
        Ok(true)
    }

    async fn count(&self, collection: &str, filters: &Map<String, Value>) -> Result<usize> {
        if filters.is_empty() {
            let mut conn = self.conn().await?;
            let len: usize = conn
                .hlen(Self::hash_key(collection))
                .await
                .map_err(storage_err)?;
            return Ok(len);
        }
        Ok(self.query(collection, filters, None, 0).await?.len())
    }

    async fn clear(&self, collection: &str) -> Result<usize> {
        let mut conn = self.conn().await?;
        let len: usize = conn
            .hlen(Self::hash_key(collection))
            .await
            .map_err(storage_err)?;
        let _: () = conn
            .del(Self::hash_key(collection))
            .await
            .map_err(storage_err)?;
        Ok(len)
    }

    async fn atomic_add(&self, collection: &str, key: &str, delta: Decimal) -> Result<Decimal> {
        let mut conn = self.conn().await?;
        let new_value: String = redis::cmd("INCRBYFLOAT")
            .arg(Self::counter_key(collection, key))
            .arg(delta.to_string())
            .query_async(&mut conn)
            .await
            .map_err(storage_err)?;
        Decimal::from_str(&new_value)
            .map_err(|e| Error::Storage(format!("redis counter parse: {e}")))
    }

    async fn acquire_lock(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn().await?;
        let acquired: Option<String> = redis::cmd("SET")
            .arg(format!("{KEY_PREFIX}:lock:{key}"))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(storage_err)?;
        Ok(acquired.is_some())
    }

    async fn release_lock(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn
            .del(format!("{KEY_PREFIX}:lock:{key}"))
            .await
            .map_err(storage_err)?;
        Ok(removed > 0)
    }

    async fn health_check(&self) -> bool {
        let Ok(mut conn) = self.conn().await else {
            return false;
        };
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}
