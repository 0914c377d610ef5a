//! Pluggable key-value storage with collections.
//!
//! Everything stateful in the orchestrator — guard counters, ledger entries,
//! intents, trust cache, circuit breaker state — goes through
//! [`StorageBackend`]. The only operation required to be strictly atomic
//! across concurrent callers is [`StorageBackend::atomic_add`]; guard
//! reservations layer their two-phase semantics on top of it.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;

use crate::config::{Config, StorageKind};
use crate::error::{Error, Result};

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::InMemoryStorage;

/// Storage contract.
///
/// Collections are independent namespaces; keys are opaque strings; values
/// are JSON documents. `atomic_add` treats the value at a key as a decimal
/// counter and must return the post-increment value under concurrency.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Save (overwrite) a document.
    async fn save(&self, collection: &str, key: &str, value: Value) -> Result<()>;

    /// Fetch a document.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    /// Delete a document. Returns whether it existed.
    async fn delete(&self, collection: &str, key: &str) -> Result<bool>;

    /// Query documents by exact top-level field equality.
    async fn query(
        &self,
        collection: &str,
        filters: &Map<String, Value>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Value>>;

    /// Merge fields into an existing document. Returns whether it existed.
    async fn update(&self, collection: &str, key: &str, patch: Map<String, Value>) -> Result<bool>;

    /// Count documents matching the filters.
    async fn count(&self, collection: &str, filters: &Map<String, Value>) -> Result<usize>;

    /// Remove every document in a collection. Returns how many were removed.
    async fn clear(&self, collection: &str) -> Result<usize>;

    /// Atomically add `delta` to the decimal counter at `key`, returning the
    /// new value. Missing keys start at zero.
    async fn atomic_add(&self, collection: &str, key: &str, delta: Decimal) -> Result<Decimal>;

    /// Best-effort distributed lock. Default implementation always grants.
    async fn acquire_lock(&self, _key: &str, _ttl_secs: u64) -> Result<bool> {
        Ok(true)
    }

    /// Release a lock taken with [`StorageBackend::acquire_lock`].
    async fn release_lock(&self, _key: &str) -> Result<bool> {
        Ok(true)
    }

    /// Liveness probe.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Parse a stored counter value. Counters are stored as decimal strings, but
/// numbers and `{"value": ...}` wrappers from older layouts are accepted.
pub(crate) fn counter_value(value: Option<&Value>) -> Decimal {
    match value {
        None | Some(Value::Null) => Decimal::ZERO,
        Some(Value::String(s)) => Decimal::from_str(s).unwrap_or(Decimal::ZERO),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).unwrap_or(Decimal::ZERO),
        Some(Value::Object(map)) => counter_value(map.get("value")),
        Some(_) => Decimal::ZERO,
    }
}

/// Construct the storage backend selected by the configuration.
pub fn storage_from_config(config: &Config) -> Result<Arc<dyn StorageBackend>> {
    match config.storage_backend {
        StorageKind::Memory => Ok(Arc::new(InMemoryStorage::new())),
        #[cfg(feature = "redis")]
        StorageKind::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                Error::Configuration("redis storage selected but no redis_url set".into())
            })?;
            Ok(Arc::new(redis::RedisStorage::new(url)?))
        }
        #[cfg(not(feature = "redis"))]
        StorageKind::Redis => Err(Error::Configuration(
            "redis storage selected but the crate was built without the `redis` feature".into(),
        )),
    }
}
