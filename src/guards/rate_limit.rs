//! Rate-limit guard: fixed-window transaction counters.
//!
//! Counters are keyed `ratelimit:{wallet}:{name}:{minute|hour|day}:{bucket}`.
//! `reserve` atomically increments each configured window and refuses when a
//! new value exceeds its cap, rolling all increments back. Commit is a no-op
//! (the cost was paid by the reservation); release undoes the increments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;

use super::{GUARD_STATE, Guard, GuardResult, PaymentContext, ReservationToken};
use crate::error::{Error, Result};
use crate::storage::{StorageBackend, counter_value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    fn label(&self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }
}

/// Guard that caps the number of payments per calendar window.
pub struct RateLimitGuard {
    name: String,
    max_per_minute: Option<u32>,
    max_per_hour: Option<u32>,
    max_per_day: Option<u32>,
    storage: Arc<dyn StorageBackend>,
}

impl RateLimitGuard {
    /// At least one cap must be set.
    pub fn new(
        name: impl Into<String>,
        max_per_minute: Option<u32>,
        max_per_hour: Option<u32>,
        max_per_day: Option<u32>,
        storage: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        if max_per_minute.is_none() && max_per_hour.is_none() && max_per_day.is_none() {
            return Err(Error::Validation(
                "rate limit guard requires at least one cap".into(),
            ));
        }
        Ok(RateLimitGuard {
            name: name.into(),
            max_per_minute,
            max_per_hour,
            max_per_day,
            storage,
        })
    }

    fn windows(&self) -> Vec<(Window, u32)> {
        let mut windows = Vec::new();
        if let Some(cap) = self.max_per_minute {
            windows.push((Window::Minute, cap));
        }
        if let Some(cap) = self.max_per_hour {
            windows.push((Window::Hour, cap));
        }
        if let Some(cap) = self.max_per_day {
            windows.push((Window::Day, cap));
        }
        windows
    }

    fn bucket_key(&self, wallet_id: &str, window: Window, ts: DateTime<Utc>) -> String {
        let bucket = match window {
            Window::Minute => ts.format("%Y%m%d%H%M").to_string(),
            Window::Hour => ts.format("%Y%m%d%H").to_string(),
            Window::Day => ts.format("%Y%m%d").to_string(),
        };
        format!(
            "ratelimit:{wallet_id}:{}:{}:{bucket}",
            self.name,
            window.label()
        )
    }

    async fn window_count(&self, wallet_id: &str, window: Window) -> u32 {
        let key = self.bucket_key(wallet_id, window, Utc::now());
        let value = self.storage.get(GUARD_STATE, &key).await.ok().flatten();
        counter_value(value.as_ref()).to_u32().unwrap_or(0)
    }

    /// Payments counted in the current minute bucket.
    pub async fn minute_count(&self, wallet_id: &str) -> u32 {
        self.window_count(wallet_id, Window::Minute).await
    }

    /// Payments counted in the current day bucket.
    pub async fn day_count(&self, wallet_id: &str) -> u32 {
        self.window_count(wallet_id, Window::Day).await
    }
}

#[async_trait]
impl Guard for RateLimitGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, context: &PaymentContext) -> GuardResult {
        for (window, cap) in self.windows() {
            let current = self.window_count(&context.wallet_id, window).await;
            if current >= cap {
                return GuardResult::block(
                    &self.name,
                    format!("Rate limit exceeded ({}): {current}/{cap}", window.label()),
                );
            }
        }
        GuardResult::allow(&self.name)
    }

    async fn reserve(&self, context: &PaymentContext) -> Result<Option<String>> {
        let wallet_id = &context.wallet_id;
        let now = Utc::now();
        let mut incremented: Vec<String> = Vec::new();

        for (window, cap) in self.windows() {
            let key = self.bucket_key(wallet_id, window, now);
            let new_value = match self.storage.atomic_add(GUARD_STATE, &key, Decimal::ONE).await {
                Ok(value) => value,
                Err(e) => {
                    self.rollback(&incremented).await;
                    return Err(e);
                }
            };
            incremented.push(key);

            if new_value.to_u32().unwrap_or(u32::MAX) > cap {
                self.rollback(&incremented).await;
                return Err(Error::Guard {
                    guard: self.name.clone(),
                    reason: format!("Rate limit exceeded ({}). Limit: {cap}", window.label()),
                });
            }
        }

        if incremented.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            ReservationToken::new(wallet_id, Decimal::ONE, now).encode()?,
        ))
    }

    // Commit is a no-op: the count was taken at reserve time.

    async fn release(&self, token: Option<&str>) {
        let Some(token) = token.and_then(ReservationToken::decode) else {
            return;
        };
        for (window, _) in self.windows() {
            let key = self.bucket_key(&token.w, window, token.ts);
            if let Err(e) = self
                .storage
                .atomic_add(GUARD_STATE, &key, -Decimal::ONE)
                .await
            {
                tracing::warn!(guard = %self.name, %key, "rate limit release failed: {e}");
            }
        }
    }
}

impl RateLimitGuard {
    async fn rollback(&self, keys: &[String]) {
        for key in keys {
            let _ = self
                .storage
                .atomic_add(GUARD_STATE, key, -Decimal::ONE)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn guard(per_minute: u32) -> RateLimitGuard {
        RateLimitGuard::new(
            "rate_limit",
            Some(per_minute),
            None,
            None,
            Arc::new(InMemoryStorage::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn requires_a_cap() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        assert!(RateLimitGuard::new("rl", None, None, None, storage).is_err());
    }

    #[tokio::test]
    async fn caps_reservations_per_window() {
        let guard = guard(2);
        let context = PaymentContext::new("w-1", "0xabc", Decimal::ONE);

        assert!(guard.reserve(&context).await.is_ok());
        assert!(guard.reserve(&context).await.is_ok());
        let err = guard.reserve(&context).await.unwrap_err();
        assert!(matches!(err, Error::Guard { ref reason, .. } if reason.contains("minute")));
        assert_eq!(guard.minute_count("w-1").await, 2);
    }

    #[tokio::test]
    async fn release_returns_capacity() {
        let guard = guard(1);
        let context = PaymentContext::new("w-1", "0xabc", Decimal::ONE);

        let token = guard.reserve(&context).await.unwrap();
        assert!(guard.reserve(&context).await.is_err());
        guard.release(token.as_deref()).await;
        assert_eq!(guard.minute_count("w-1").await, 0);
        assert!(guard.reserve(&context).await.is_ok());
    }

    #[tokio::test]
    async fn commit_is_free() {
        let guard = guard(5);
        let context = PaymentContext::new("w-1", "0xabc", Decimal::ONE);
        let token = guard.reserve(&context).await.unwrap();
        guard.commit(token.as_deref()).await;
        // Commit does not double count.
        assert_eq!(guard.minute_count("w-1").await, 1);
    }

    #[tokio::test]
    async fn wallets_are_isolated() {
        let guard = guard(1);
        let a = PaymentContext::new("w-a", "0xabc", Decimal::ONE);
        let b = PaymentContext::new("w-b", "0xabc", Decimal::ONE);
        assert!(guard.reserve(&a).await.is_ok());
        assert!(guard.reserve(&b).await.is_ok());
    }
}
