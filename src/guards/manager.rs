//! Guard configuration persistence and chain assembly.
//!
//! Guard configurations are stored per `(scope_type, scope_id)` — `wallet`
//! or `wallet_set` — as a single document `{"guards": [config, ...]}`.
//! A wallet's effective chain is its set's guards followed by its own, read
//! fresh from storage on every payment.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use super::{
    BudgetGuard, ConfirmCallback, ConfirmGuard, Guard, GuardChain, PaymentContext, RateLimitGuard,
    RecipientGuard, RecipientMode, SingleTxGuard,
};
use crate::error::{Error, Result};
use crate::storage::StorageBackend;

const COLLECTION: &str = "guard_registrations";

/// Kind tag for a persisted guard configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardType {
    Budget,
    SingleTx,
    Recipient,
    RateLimit,
    Confirm,
}

/// Serializable guard configuration.
///
/// One tagged record covers every guard kind; irrelevant fields stay `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    pub id: String,
    pub guard_type: GuardType,
    pub name: String,

    // Budget
    #[serde(default)]
    pub daily_limit: Option<Decimal>,
    #[serde(default)]
    pub hourly_limit: Option<Decimal>,
    #[serde(default)]
    pub total_limit: Option<Decimal>,

    // Single tx
    #[serde(default)]
    pub max_amount: Option<Decimal>,
    #[serde(default)]
    pub min_amount: Option<Decimal>,

    // Recipient
    #[serde(default)]
    pub recipient_mode: Option<RecipientMode>,
    #[serde(default)]
    pub recipient_addresses: Vec<String>,
    #[serde(default)]
    pub recipient_domains: Vec<String>,
    #[serde(default)]
    pub recipient_patterns: Vec<String>,

    // Rate limit
    #[serde(default)]
    pub max_per_minute: Option<u32>,
    #[serde(default)]
    pub max_per_hour: Option<u32>,
    #[serde(default)]
    pub max_per_day: Option<u32>,

    // Confirm
    #[serde(default)]
    pub confirm_threshold: Option<Decimal>,
    #[serde(default)]
    pub always_confirm: bool,
}

impl GuardConfig {
    fn base(guard_type: GuardType, name: impl Into<String>) -> Self {
        GuardConfig {
            id: Uuid::new_v4().to_string(),
            guard_type,
            name: name.into(),
            daily_limit: None,
            hourly_limit: None,
            total_limit: None,
            max_amount: None,
            min_amount: None,
            recipient_mode: None,
            recipient_addresses: Vec::new(),
            recipient_domains: Vec::new(),
            recipient_patterns: Vec::new(),
            max_per_minute: None,
            max_per_hour: None,
            max_per_day: None,
            confirm_threshold: None,
            always_confirm: false,
        }
    }

    pub fn budget(
        name: impl Into<String>,
        hourly_limit: Option<Decimal>,
        daily_limit: Option<Decimal>,
        total_limit: Option<Decimal>,
    ) -> Self {
        GuardConfig {
            hourly_limit,
            daily_limit,
            total_limit,
            ..Self::base(GuardType::Budget, name)
        }
    }

    pub fn single_tx(
        name: impl Into<String>,
        max_amount: Decimal,
        min_amount: Option<Decimal>,
    ) -> Self {
        GuardConfig {
            max_amount: Some(max_amount),
            min_amount,
            ..Self::base(GuardType::SingleTx, name)
        }
    }

    pub fn recipient(
        name: impl Into<String>,
        mode: RecipientMode,
        addresses: Vec<String>,
        domains: Vec<String>,
        patterns: Vec<String>,
    ) -> Self {
        GuardConfig {
            recipient_mode: Some(mode),
            recipient_addresses: addresses,
            recipient_domains: domains,
            recipient_patterns: patterns,
            ..Self::base(GuardType::Recipient, name)
        }
    }

    pub fn rate_limit(
        name: impl Into<String>,
        max_per_minute: Option<u32>,
        max_per_hour: Option<u32>,
        max_per_day: Option<u32>,
    ) -> Self {
        GuardConfig {
            max_per_minute,
            max_per_hour,
            max_per_day,
            ..Self::base(GuardType::RateLimit, name)
        }
    }

    pub fn confirm(
        name: impl Into<String>,
        threshold: Option<Decimal>,
        always_confirm: bool,
    ) -> Self {
        GuardConfig {
            confirm_threshold: threshold,
            always_confirm,
            ..Self::base(GuardType::Confirm, name)
        }
    }

    /// Instantiate the configured guard against a storage backend.
    pub fn to_guard(
        &self,
        storage: Arc<dyn StorageBackend>,
        confirm_callback: Option<ConfirmCallback>,
    ) -> Result<Arc<dyn Guard>> {
        Ok(match self.guard_type {
            GuardType::Budget => Arc::new(BudgetGuard::new(
                &self.name,
                self.hourly_limit,
                self.daily_limit,
                self.total_limit,
                storage,
            )?),
            GuardType::SingleTx => Arc::new(SingleTxGuard::new(
                &self.name,
                self.max_amount.ok_or_else(|| {
                    Error::Validation("single_tx guard requires max_amount".into())
                })?,
                self.min_amount,
            )),
            GuardType::Recipient => Arc::new(RecipientGuard::new(
                &self.name,
                self.recipient_mode.unwrap_or_default(),
                self.recipient_addresses.clone(),
                self.recipient_domains.clone(),
                self.recipient_patterns.clone(),
            )?),
            GuardType::RateLimit => Arc::new(RateLimitGuard::new(
                &self.name,
                self.max_per_minute,
                self.max_per_hour,
                self.max_per_day,
                storage,
            )?),
            GuardType::Confirm => Arc::new(ConfirmGuard::new(
                &self.name,
                self.confirm_threshold,
                self.always_confirm,
                confirm_callback,
            )),
        })
    }
}

/// Scope a guard registration applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardScope<'a> {
    Wallet(&'a str),
    WalletSet(&'a str),
}

impl GuardScope<'_> {
    fn key(&self) -> String {
        match self {
            GuardScope::Wallet(id) => format!("wallet:{id}"),
            GuardScope::WalletSet(id) => format!("wallet_set:{id}"),
        }
    }
}

/// Manages persisted guard registrations and assembles effective chains.
pub struct GuardManager {
    storage: Arc<dyn StorageBackend>,
    confirm_callback: Option<ConfirmCallback>,
}

impl GuardManager {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        GuardManager {
            storage,
            confirm_callback: None,
        }
    }

    /// Register the callback injected into every [`ConfirmGuard`].
    pub fn set_confirm_callback(&mut self, callback: ConfirmCallback) {
        self.confirm_callback = Some(callback);
    }

    /// Append a guard configuration to a scope.
    pub async fn add_guard(&self, scope: GuardScope<'_>, config: GuardConfig) -> Result<()> {
        // Validate eagerly so a bad config never reaches the pay path.
        config.to_guard(self.storage.clone(), self.confirm_callback.clone())?;

        let key = scope.key();
        let mut doc = self
            .storage
            .get(COLLECTION, &key)
            .await?
            .unwrap_or_else(|| serde_json::json!({"guards": []}));
        let guards = doc
            .get_mut("guards")
            .and_then(Value::as_array_mut)
            .ok_or_else(|| Error::Storage("malformed guard registration document".into()))?;
        guards.push(serde_json::to_value(&config)?);
        self.storage.save(COLLECTION, &key, doc).await
    }

    /// Remove guards by name from a scope. Returns whether any was removed.
    pub async fn remove_guard(&self, scope: GuardScope<'_>, guard_name: &str) -> Result<bool> {
        let key = scope.key();
        let Some(mut doc) = self.storage.get(COLLECTION, &key).await? else {
            return Ok(false);
        };
        let Some(guards) = doc.get_mut("guards").and_then(Value::as_array_mut) else {
            return Ok(false);
        };
        let before = guards.len();
        guards.retain(|g| g.get("name").and_then(Value::as_str) != Some(guard_name));
        if guards.len() == before {
            return Ok(false);
        }
        self.storage.save(COLLECTION, &key, doc).await?;
        Ok(true)
    }

    /// Names of guards registered on a scope, in registration order.
    pub async fn list_guard_names(&self, scope: GuardScope<'_>) -> Result<Vec<String>> {
        Ok(self
            .configs_for(scope)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    /// Drop all guards registered on a scope.
    pub async fn clear_guards(&self, scope: GuardScope<'_>) -> Result<bool> {
        self.storage.delete(COLLECTION, &scope.key()).await
    }

    async fn configs_for(&self, scope: GuardScope<'_>) -> Result<Vec<GuardConfig>> {
        let Some(doc) = self.storage.get(COLLECTION, &scope.key()).await? else {
            return Ok(Vec::new());
        };
        let guards = doc.get("guards").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(guards).map_err(Error::from)
    }

    /// Effective chain: wallet-set guards first, then wallet guards.
    pub async fn get_guard_chain(
        &self,
        wallet_id: &str,
        wallet_set_id: Option<&str>,
    ) -> Result<GuardChain> {
        let mut chain = GuardChain::new();
        if let Some(set_id) = wallet_set_id {
            for config in self.configs_for(GuardScope::WalletSet(set_id)).await? {
                chain.add(config.to_guard(self.storage.clone(), self.confirm_callback.clone())?);
            }
        }
        for config in self.configs_for(GuardScope::Wallet(wallet_id)).await? {
            chain.add(config.to_guard(self.storage.clone(), self.confirm_callback.clone())?);
        }
        Ok(chain)
    }

    /// Non-mutating pre-check used by `simulate`.
    /// Returns `(allowed, reason, passed_names)`.
    pub async fn check(
        &self,
        context: &PaymentContext,
    ) -> Result<(bool, Option<String>, Vec<String>)> {
        let chain = self
            .get_guard_chain(&context.wallet_id, context.wallet_set_id.as_deref())
            .await?;
        if chain.is_empty() {
            return Ok((true, None, Vec::new()));
        }
        let (result, passed) = chain.check(context).await;
        if !result.allowed {
            tracing::warn!(
                wallet = %context.wallet_id,
                guard = %result.guard_name,
                "payment blocked by guard: {:?}",
                result.reason
            );
        }
        Ok((result.allowed, result.reason, passed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn manager() -> GuardManager {
        GuardManager::new(Arc::new(InMemoryStorage::new()))
    }

    #[tokio::test]
    async fn add_list_remove() {
        let manager = manager();
        manager
            .add_guard(
                GuardScope::Wallet("w-1"),
                GuardConfig::single_tx("single_tx", Decimal::from(5), None),
            )
            .await
            .unwrap();
        manager
            .add_guard(
                GuardScope::Wallet("w-1"),
                GuardConfig::budget("budget", None, Some(Decimal::from(100)), None),
            )
            .await
            .unwrap();

        assert_eq!(
            manager
                .list_guard_names(GuardScope::Wallet("w-1"))
                .await
                .unwrap(),
            vec!["single_tx".to_string(), "budget".to_string()]
        );

        assert!(manager
            .remove_guard(GuardScope::Wallet("w-1"), "single_tx")
            .await
            .unwrap());
        assert!(!manager
            .remove_guard(GuardScope::Wallet("w-1"), "single_tx")
            .await
            .unwrap());
        assert_eq!(
            manager
                .list_guard_names(GuardScope::Wallet("w-1"))
                .await
                .unwrap(),
            vec!["budget".to_string()]
        );
    }

    #[tokio::test]
    async fn effective_chain_orders_set_before_wallet() {
        let manager = manager();
        manager
            .add_guard(
                GuardScope::WalletSet("ws-1"),
                GuardConfig::single_tx("set_cap", Decimal::from(100), None),
            )
            .await
            .unwrap();
        manager
            .add_guard(
                GuardScope::Wallet("w-1"),
                GuardConfig::single_tx("wallet_cap", Decimal::from(10), None),
            )
            .await
            .unwrap();

        let chain = manager.get_guard_chain("w-1", Some("ws-1")).await.unwrap();
        assert_eq!(chain.names(), vec!["set_cap".to_string(), "wallet_cap".to_string()]);
    }

    #[tokio::test]
    async fn check_reports_refusal() {
        let manager = manager();
        manager
            .add_guard(
                GuardScope::Wallet("w-1"),
                GuardConfig::single_tx("single_tx", Decimal::from(5), None),
            )
            .await
            .unwrap();

        let context = PaymentContext::new("w-1", "0xabc", Decimal::from(10));
        let (allowed, reason, passed) = manager.check(&context).await.unwrap();
        assert!(!allowed);
        assert!(reason.unwrap().contains("max"));
        assert!(passed.is_empty());

        let ok = PaymentContext::new("w-1", "0xabc", Decimal::from(3));
        let (allowed, _, passed) = manager.check(&ok).await.unwrap();
        assert!(allowed);
        assert_eq!(passed, vec!["single_tx".to_string()]);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_add_time() {
        let manager = manager();
        let err = manager
            .add_guard(
                GuardScope::Wallet("w-1"),
                GuardConfig::budget("budget", None, None, None),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn configs_round_trip_through_storage() {
        let manager = manager();
        let config = GuardConfig::recipient(
            "recipient",
            RecipientMode::Blacklist,
            vec!["0xdead000000000000000000000000000000000000".into()],
            vec!["bad.example.com".into()],
            vec!["^0xdead".into()],
        );
        manager
            .add_guard(GuardScope::Wallet("w-1"), config)
            .await
            .unwrap();

        let chain = manager.get_guard_chain("w-1", None).await.unwrap();
        assert_eq!(chain.len(), 1);
        let context = PaymentContext::new("w-1", "https://bad.example.com/x", Decimal::ONE);
        let (result, _) = chain.check(&context).await;
        assert!(!result.allowed);
    }
}
