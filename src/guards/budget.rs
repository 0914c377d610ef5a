//! Budget guard: windowed spending caps.
//!
//! Spend counters live in calendar buckets
//! (`budget:{wallet}:{name}:{daily|hourly|total}[:YYYYMMDD[HH]]`) with a
//! companion `:reserved` key holding provisional increments. Reservation
//! first bumps `:reserved`, then reads `main + reserved`; exceeding the limit
//! rolls the bump back and refuses. Commit moves the amount from `:reserved`
//! into the main bucket of the same calendar slot the token was taken in.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use super::{GUARD_STATE, Guard, GuardResult, PaymentContext, ReservationToken};
use crate::error::{Error, Result};
use crate::storage::{StorageBackend, counter_value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Hourly,
    Daily,
    Total,
}

impl Window {
    fn label(&self) -> &'static str {
        match self {
            Window::Hourly => "hourly",
            Window::Daily => "daily",
            Window::Total => "total",
        }
    }
}

/// Guard that enforces hourly / daily / lifetime spending caps per wallet.
pub struct BudgetGuard {
    name: String,
    hourly_limit: Option<Decimal>,
    daily_limit: Option<Decimal>,
    total_limit: Option<Decimal>,
    storage: Arc<dyn StorageBackend>,
}

impl BudgetGuard {
    /// At least one limit must be set.
    pub fn new(
        name: impl Into<String>,
        hourly_limit: Option<Decimal>,
        daily_limit: Option<Decimal>,
        total_limit: Option<Decimal>,
        storage: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        if hourly_limit.is_none() && daily_limit.is_none() && total_limit.is_none() {
            return Err(Error::Validation(
                "budget guard requires at least one limit".into(),
            ));
        }
        Ok(BudgetGuard {
            name: name.into(),
            hourly_limit,
            daily_limit,
            total_limit,
            storage,
        })
    }

    fn windows(&self) -> Vec<(Window, Decimal)> {
        let mut windows = Vec::new();
        if let Some(limit) = self.hourly_limit {
            windows.push((Window::Hourly, limit));
        }
        if let Some(limit) = self.daily_limit {
            windows.push((Window::Daily, limit));
        }
        if let Some(limit) = self.total_limit {
            windows.push((Window::Total, limit));
        }
        windows
    }

    fn bucket_key(&self, wallet_id: &str, window: Window, ts: DateTime<Utc>) -> String {
        let base = format!("budget:{wallet_id}:{}", self.name);
        match window {
            Window::Total => format!("{base}:total"),
            Window::Daily => format!("{base}:daily:{}", ts.format("%Y%m%d")),
            Window::Hourly => format!("{base}:hourly:{}", ts.format("%Y%m%d%H")),
        }
    }

    async fn window_spent(&self, wallet_id: &str, window: Window, ts: DateTime<Utc>) -> Decimal {
        let key = self.bucket_key(wallet_id, window, ts);
        let main = self.storage.get(GUARD_STATE, &key).await.ok().flatten();
        counter_value(main.as_ref())
    }

    /// Committed spend in the current hourly bucket.
    pub async fn hourly_spent(&self, wallet_id: &str) -> Decimal {
        self.window_spent(wallet_id, Window::Hourly, Utc::now()).await
    }

    /// Committed spend in the current daily bucket.
    pub async fn daily_spent(&self, wallet_id: &str) -> Decimal {
        self.window_spent(wallet_id, Window::Daily, Utc::now()).await
    }

    /// Lifetime committed spend.
    pub async fn total_spent(&self, wallet_id: &str) -> Decimal {
        self.window_spent(wallet_id, Window::Total, Utc::now()).await
    }

    async fn reserved_and_main(&self, key: &str) -> Result<Decimal> {
        let main = self.storage.get(GUARD_STATE, key).await?;
        let reserved = self
            .storage
            .get(GUARD_STATE, &format!("{key}:reserved"))
            .await?;
        Ok(counter_value(main.as_ref()) + counter_value(reserved.as_ref()))
    }
}

#[async_trait]
impl Guard for BudgetGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, context: &PaymentContext) -> GuardResult {
        let now = Utc::now();
        for (window, limit) in self.windows() {
            let spent = self
                .window_spent(&context.wallet_id, window, now)
                .await;
            if spent + context.amount > limit {
                return GuardResult::block(
                    &self.name,
                    format!(
                        "{} limit exceeded. Spent: {spent}, Limit: {limit}, Requested: {}",
                        capitalize(window.label()),
                        context.amount
                    ),
                );
            }
        }
        GuardResult::allow(&self.name)
    }

    async fn reserve(&self, context: &PaymentContext) -> Result<Option<String>> {
        let amount = context.amount;
        let wallet_id = &context.wallet_id;
        let now = Utc::now();

        let mut reserved_keys: Vec<String> = Vec::new();
        let rollback = |keys: Vec<String>, storage: Arc<dyn StorageBackend>| async move {
            for key in keys {
                let _ = storage.atomic_add(GUARD_STATE, &key, -amount).await;
            }
        };

        for (window, limit) in self.windows() {
            let key = self.bucket_key(wallet_id, window, now);
            let reserved_key = format!("{key}:reserved");

            // Optimistic increment, then verify against main + reserved.
            if let Err(e) = self
                .storage
                .atomic_add(GUARD_STATE, &reserved_key, amount)
                .await
            {
                rollback(reserved_keys, self.storage.clone()).await;
                return Err(e);
            }
            reserved_keys.push(reserved_key.clone());

            let in_flight = match self.reserved_and_main(&key).await {
                Ok(total) => total,
                Err(e) => {
                    rollback(reserved_keys, self.storage.clone()).await;
                    return Err(e);
                }
            };
            if in_flight > limit {
                rollback(reserved_keys, self.storage.clone()).await;
                return Err(Error::Guard {
                    guard: self.name.clone(),
                    reason: format!(
                        "{} budget limit exceeded. Limit: {limit}",
                        capitalize(window.label())
                    ),
                });
            }
        }

        if reserved_keys.is_empty() {
            return Ok(None);
        }
        Ok(Some(ReservationToken::new(wallet_id, amount, now).encode()?))
    }

    async fn commit(&self, token: Option<&str>) {
        let Some(token) = token.and_then(ReservationToken::decode) else {
            return;
        };
        for (window, _) in self.windows() {
            let key = self.bucket_key(&token.w, window, token.ts);
            // Move reserved -> main within the bucket the token was taken in.
            if let Err(e) = self.storage.atomic_add(GUARD_STATE, &key, token.a).await {
                tracing::warn!(guard = %self.name, %key, "budget commit failed: {e}");
                continue;
            }
            if let Err(e) = self
                .storage
                .atomic_add(GUARD_STATE, &format!("{key}:reserved"), -token.a)
                .await
            {
                tracing::warn!(guard = %self.name, %key, "budget reserved decrement failed: {e}");
            }
        }
    }

    async fn release(&self, token: Option<&str>) {
        let Some(token) = token.and_then(ReservationToken::decode) else {
            return;
        };
        for (window, _) in self.windows() {
            let key = self.bucket_key(&token.w, window, token.ts);
            if let Err(e) = self
                .storage
                .atomic_add(GUARD_STATE, &format!("{key}:reserved"), -token.a)
                .await
            {
                tracing::warn!(guard = %self.name, %key, "budget release failed: {e}");
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use std::str::FromStr;

    fn guard(daily: &str, storage: Arc<dyn StorageBackend>) -> BudgetGuard {
        BudgetGuard::new(
            "budget",
            None,
            Some(Decimal::from_str(daily).unwrap()),
            None,
            storage,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn requires_a_limit() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        assert!(BudgetGuard::new("budget", None, None, None, storage).is_err());
    }

    #[tokio::test]
    async fn reserve_commit_counts_toward_budget() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        let guard = guard("100", storage.clone());
        let context = PaymentContext::new("w-1", "0xabc", Decimal::from(60));

        let token = guard.reserve(&context).await.unwrap();
        assert!(token.is_some());
        guard.commit(token.as_deref()).await;

        assert_eq!(guard.daily_spent("w-1").await, Decimal::from(60));

        // Second 60 exceeds the daily 100.
        let err = guard.reserve(&context).await.unwrap_err();
        assert!(matches!(err, Error::Guard { ref reason, .. } if reason.contains("Daily")));
    }

    #[tokio::test]
    async fn reserve_release_restores_counters() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        let guard = BudgetGuard::new(
            "budget",
            Some(Decimal::from(10)),
            Some(Decimal::from(100)),
            Some(Decimal::from(1000)),
            storage.clone(),
        )
        .unwrap();
        let context = PaymentContext::new("w-1", "0xabc", Decimal::from(5));

        let token = guard.reserve(&context).await.unwrap();
        guard.release(token.as_deref()).await;

        // Every counter is back to zero.
        assert_eq!(guard.hourly_spent("w-1").await, Decimal::ZERO);
        assert_eq!(guard.daily_spent("w-1").await, Decimal::ZERO);
        assert_eq!(guard.total_spent("w-1").await, Decimal::ZERO);
        // And a full-size reservation fits again.
        let context = PaymentContext::new("w-1", "0xabc", Decimal::from(10));
        assert!(guard.reserve(&context).await.is_ok());
    }

    #[tokio::test]
    async fn failed_reserve_rolls_back_earlier_windows() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        // Hourly passes at 50, daily refuses at 30.
        let guard = BudgetGuard::new(
            "budget",
            Some(Decimal::from(50)),
            Some(Decimal::from(30)),
            None,
            storage.clone(),
        )
        .unwrap();
        let context = PaymentContext::new("w-1", "0xabc", Decimal::from(40));

        let err = guard.reserve(&context).await.unwrap_err();
        assert!(matches!(err, Error::Guard { .. }));

        // The hourly provisional increment was rolled back, so a fitting
        // payment still goes through.
        let small = PaymentContext::new("w-1", "0xabc", Decimal::from(20));
        assert!(guard.reserve(&small).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_reservations_cannot_both_win() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        let guard = Arc::new(guard("100", storage.clone()));

        let a = {
            let guard = guard.clone();
            tokio::spawn(async move {
                let context = PaymentContext::new("w-1", "0xabc", Decimal::from(60));
                guard.reserve(&context).await
            })
        };
        let b = {
            let guard = guard.clone();
            tokio::spawn(async move {
                let context = PaymentContext::new("w-1", "0xabc", Decimal::from(60));
                guard.reserve(&context).await
            })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        // Two 60-unit reserves can never both fit in 100. (Under an unlucky
        // interleaving both may refuse; the invariant is no over-reserve.)
        assert!(wins <= 1, "both 60-unit reserves won against a 100 budget");
    }

    #[tokio::test]
    async fn check_is_non_mutating() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        let guard = guard("100", storage.clone());
        let context = PaymentContext::new("w-1", "0xabc", Decimal::from(60));

        for _ in 0..3 {
            assert!(guard.check(&context).await.allowed);
        }
        let over = PaymentContext::new("w-1", "0xabc", Decimal::from(101));
        assert!(!guard.check(&over).await.allowed);
    }
}
