//! Append-and-mutate payment ledger.
//!
//! Every `pay` call records exactly one entry. After creation only `status`,
//! `tx_hash`, and merged `metadata` may change; identity fields are
//! immutable. Entries persist through the shared [`StorageBackend`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::StorageBackend;
use crate::types::decimal_string;

const COLLECTION: &str = "ledger_entries";

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntryType {
    #[default]
    Payment,
    Refund,
    Transfer,
    Fee,
}

/// Lifecycle status of a ledger entry. Transitions are monotonic:
/// PENDING moves to exactly one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntryStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Cancelled,
    Blocked,
}

/// A single ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub wallet_id: String,
    #[serde(default)]
    pub wallet_set_id: Option<String>,
    pub recipient: String,
    #[serde(with = "decimal_string")]
    pub amount: Decimal,
    pub entry_type: LedgerEntryType,
    pub status: LedgerEntryStatus,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl LedgerEntry {
    /// New PENDING payment entry with a fresh id.
    pub fn new(wallet_id: impl Into<String>, recipient: impl Into<String>, amount: Decimal) -> Self {
        LedgerEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            wallet_id: wallet_id.into(),
            wallet_set_id: None,
            recipient: recipient.into(),
            amount,
            entry_type: LedgerEntryType::Payment,
            status: LedgerEntryStatus::Pending,
            tx_hash: None,
            method: String::new(),
            purpose: None,
            metadata: Map::new(),
        }
    }

    pub fn with_purpose(mut self, purpose: Option<String>) -> Self {
        self.purpose = purpose;
        self
    }

    pub fn with_wallet_set(mut self, wallet_set_id: Option<String>) -> Self {
        self.wallet_set_id = wallet_set_id;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Query filters for [`Ledger::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct LedgerQuery {
    pub wallet_id: Option<String>,
    pub wallet_set_id: Option<String>,
    pub recipient: Option<String>,
    pub entry_type: Option<LedgerEntryType>,
    pub status: Option<LedgerEntryStatus>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl LedgerQuery {
    pub fn for_wallet(wallet_id: impl Into<String>) -> Self {
        LedgerQuery {
            wallet_id: Some(wallet_id.into()),
            limit: 100,
            ..Default::default()
        }
    }
}

/// Transaction ledger over the shared storage backend.
#[derive(Clone)]
pub struct Ledger {
    storage: Arc<dyn StorageBackend>,
}

impl Ledger {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Ledger { storage }
    }

    /// Record a new entry. Returns its id.
    pub async fn record(&self, entry: &LedgerEntry) -> Result<String> {
        let value = serde_json::to_value(entry)?;
        self.storage.save(COLLECTION, &entry.id, value).await?;
        Ok(entry.id.clone())
    }

    /// Fetch an entry by id.
    pub async fn get(&self, entry_id: &str) -> Result<Option<LedgerEntry>> {
        match self.storage.get(COLLECTION, entry_id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Update the mutable fields of an entry: status, tx hash, and merged
    /// metadata. The metadata read-modify-write is a single logical
    /// operation. Returns whether the entry existed.
    pub async fn update_status(
        &self,
        entry_id: &str,
        status: LedgerEntryStatus,
        tx_hash: Option<&str>,
        metadata_updates: Option<Map<String, Value>>,
    ) -> Result<bool> {
        let Some(existing) = self.storage.get(COLLECTION, entry_id).await? else {
            return Ok(false);
        };

        let mut patch = Map::new();
        patch.insert("status".into(), serde_json::to_value(status)?);
        if let Some(hash) = tx_hash {
            patch.insert("tx_hash".into(), Value::String(hash.to_string()));
        }
        if let Some(updates) = metadata_updates {
            let mut metadata = existing
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            for (field, value) in updates {
                metadata.insert(field, value);
            }
            patch.insert("metadata".into(), Value::Object(metadata));
        }

        self.storage.update(COLLECTION, entry_id, patch).await
    }

    /// Query entries, sorted by timestamp descending.
    pub async fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>> {
        let mut filters = Map::new();
        if let Some(wallet_id) = &query.wallet_id {
            filters.insert("wallet_id".into(), Value::String(wallet_id.clone()));
        }
        if let Some(wallet_set_id) = &query.wallet_set_id {
            filters.insert("wallet_set_id".into(), Value::String(wallet_set_id.clone()));
        }
        if let Some(recipient) = &query.recipient {
            filters.insert("recipient".into(), Value::String(recipient.clone()));
        }
        if let Some(entry_type) = query.entry_type {
            filters.insert("entry_type".into(), serde_json::to_value(entry_type)?);
        }
        if let Some(status) = query.status {
            filters.insert("status".into(), serde_json::to_value(status)?);
        }

        let limit = if query.limit == 0 { 100 } else { query.limit };
        // Date filtering happens after the fetch, so over-fetch a little.
        let fetch_limit = if query.from_date.is_some() || query.to_date.is_some() {
            limit * 2
        } else {
            limit
        };

        let raw = self
            .storage
            .query(COLLECTION, &filters, Some(fetch_limit), 0)
            .await?;
        let mut entries: Vec<LedgerEntry> = raw
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .filter(|entry: &LedgerEntry| {
                query.from_date.is_none_or(|from| entry.timestamp >= from)
                    && query.to_date.is_none_or(|to| entry.timestamp <= to)
            })
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }

    /// Sum of COMPLETED payment/transfer amounts for a wallet, optionally
    /// restricted to entries at or after `since`.
    pub async fn get_total_spent(
        &self,
        wallet_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Decimal> {
        let mut filters = Map::new();
        filters.insert("wallet_id".into(), Value::String(wallet_id.to_string()));
        filters.insert(
            "status".into(),
            serde_json::to_value(LedgerEntryStatus::Completed)?,
        );
        let raw = self.storage.query(COLLECTION, &filters, None, 0).await?;

        let mut total = Decimal::ZERO;
        for value in raw {
            let Ok(entry) = serde_json::from_value::<LedgerEntry>(value) else {
                continue;
            };
            if !matches!(
                entry.entry_type,
                LedgerEntryType::Payment | LedgerEntryType::Transfer
            ) {
                continue;
            }
            if since.is_some_and(|from| entry.timestamp < from) {
                continue;
            }
            total += entry.amount;
        }
        Ok(total)
    }

    /// Remove every entry. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize> {
        self.storage.clear(COLLECTION).await
    }
}
