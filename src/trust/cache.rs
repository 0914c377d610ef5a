//! Storage-backed cache for trust lookups.
//!
//! Positive identity/reputation results are cached per
//! `(chain, address, data_type)` with a TTL; misses and negative results are
//! re-fetched each time so a newly registered agent becomes visible without
//! waiting out the TTL.

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::storage::StorageBackend;

const COLLECTION: &str = "trust_cache";

/// Default cache lifetime for trust data.
pub const DEFAULT_TTL_SECS: u64 = 300;

pub struct TrustCache {
    storage: Arc<dyn StorageBackend>,
    ttl_secs: u64,
}

impl TrustCache {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        TrustCache {
            storage,
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }

    pub fn with_ttl(storage: Arc<dyn StorageBackend>, ttl_secs: u64) -> Self {
        TrustCache { storage, ttl_secs }
    }

    fn key(chain: &str, address: &str, data_type: &str) -> String {
        format!("{chain}:{}:{data_type}", address.to_lowercase())
    }

    fn now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Serve from cache when fresh; otherwise run `fetch` and cache a
    /// positive result. Returns `(data, cache_hit)`.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        chain: &str,
        address: &str,
        data_type: &str,
        fetch: F,
    ) -> Result<(Option<Value>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Value>>>,
    {
        let key = Self::key(chain, address, data_type);

        if let Some(entry) = self.storage.get(COLLECTION, &key).await? {
            let fetched_at = entry
                .get("fetched_at")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            if Self::now() - fetched_at < self.ttl_secs as f64 {
                return Ok((entry.get("data").cloned(), true));
            }
        }

        let data = fetch().await?;
        if let Some(data) = &data {
            self.storage
                .save(
                    COLLECTION,
                    &key,
                    json!({"data": data, "fetched_at": Self::now()}),
                )
                .await?;
        }
        Ok((data, false))
    }

    /// Drop a cached entry.
    pub async fn invalidate(&self, chain: &str, address: &str, data_type: &str) -> Result<bool> {
        self.storage
            .delete(COLLECTION, &Self::key(chain, address, data_type))
            .await
    }
}
