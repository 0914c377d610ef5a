//! In-memory storage backend.
//!
//! Test-grade default. Atomicity of [`StorageBackend::atomic_add`] comes
//! from the per-shard entry lock held while the counter is read, modified,
//! and written back.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{StorageBackend, counter_value};
use crate::error::Result;

/// In-process backend over nested [`DashMap`]s. Data is lost on drop.
#[derive(Default)]
pub struct InMemoryStorage {
    collections: DashMap<String, DashMap<String, Value>>,
    locks: DashMap<String, f64>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(doc: &Value, filters: &Map<String, Value>) -> bool {
        filters
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }

    fn now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn save(&self, collection: &str, key: &str, value: Value) -> Result<()> {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|coll| coll.get(key).map(|v| v.clone())))
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        Ok(self
            .collections
            .get(collection)
            .is_some_and(|coll| coll.remove(key).is_some()))
    }

    async fn query(
        &self,
        collection: &str,
        filters: &Map<String, Value>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Value>> {
        let Some(coll) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut results: Vec<Value> = coll
            .iter()
            .filter(|entry| Self::matches(entry.value(), filters))
            .map(|entry| entry.value().clone())
            .collect();
        let results = results.split_off(offset.min(results.len()));
        Ok(match limit {
            Some(n) => results.into_iter().take(n).collect(),
            None => results,
        })
    }

    async fn update(&self, collection: &str, key: &str, patch: Map<String, Value>) -> Result<bool> {
        let Some(coll) = self.collections.get(collection) else {
            return Ok(false);
        };
        let Some(mut entry) = coll.get_mut(key) else {
            return Ok(false);
        };
        if let Value::Object(existing) = entry.value_mut() {
            for (field, value) in patch {
                existing.insert(field, value);
            }
        } else {
            *entry.value_mut() = Value::Object(patch);
        }
        Ok(true)
    }

    async fn count(&self, collection: &str, filters: &Map<String, Value>) -> Result<usize> {
        let Some(coll) = self.collections.get(collection) else {
            return Ok(0);
        };
        if filters.is_empty() {
            return Ok(coll.len());
        }
        Ok(coll
            .iter()
            .filter(|entry| Self::matches(entry.value(), filters))
            .count())
    }

    async fn clear(&self, collection: &str) -> Result<usize> {
        let Some(coll) = self.collections.get(collection) else {
            return Ok(0);
        };
        let count = coll.len();
        coll.clear();
        Ok(count)
    }

    async fn atomic_add(&self, collection: &str, key: &str, delta: Decimal) -> Result<Decimal> {
        let coll = self.collections.entry(collection.to_string()).or_default();
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = coll
            .entry(key.to_string())
            .or_insert_with(|| Value::String("0".into()));
        let new_value = counter_value(Some(entry.value())) + delta;
        *entry.value_mut() = Value::String(new_value.to_string());
        Ok(new_value)
    }

    async fn acquire_lock(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let now = Self::now();
        // Entry guard holds the shard lock across check-and-set.
        let mut entry = self.locks.entry(key.to_string()).or_insert(0.0);
        if now >= *entry {
            *entry = now + ttl_secs as f64;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn release_lock(&self, key: &str) -> Result<bool> {
        Ok(self.locks.remove(key).is_some())
    }
}
