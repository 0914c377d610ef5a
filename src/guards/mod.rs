//! Spending guards with two-phase reservation semantics.
//!
//! A [`Guard`] inspects a [`PaymentContext`] and either vetoes the payment
//! (`check`) or atomically reserves quota for it (`reserve`). Reservations
//! are committed after the payment settles or released on failure; the
//! opaque token returned by `reserve` carries enough context to undo or
//! finalize the reservation without re-reading the request.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{Error, Result};

pub mod budget;
pub mod confirm;
pub mod manager;
pub mod rate_limit;
pub mod recipient;
pub mod single_tx;

pub use budget::BudgetGuard;
pub use confirm::{ConfirmCallback, ConfirmGuard};
pub use manager::{GuardConfig, GuardManager, GuardScope, GuardType};
pub use rate_limit::RateLimitGuard;
pub use recipient::{RecipientGuard, RecipientMode};
pub use single_tx::SingleTxGuard;

/// Storage collection shared by all stateful guards.
pub(crate) const GUARD_STATE: &str = "guard_state";

/// Context for a payment under guard evaluation.
#[derive(Debug, Clone)]
pub struct PaymentContext {
    pub wallet_id: String,
    pub wallet_set_id: Option<String>,
    pub recipient: String,
    pub amount: Decimal,
    pub purpose: Option<String>,
    pub metadata: Map<String, Value>,
}

impl PaymentContext {
    pub fn new(wallet_id: impl Into<String>, recipient: impl Into<String>, amount: Decimal) -> Self {
        PaymentContext {
            wallet_id: wallet_id.into(),
            wallet_set_id: None,
            recipient: recipient.into(),
            amount,
            purpose: None,
            metadata: Map::new(),
        }
    }
}

/// Result of a non-mutating guard check.
#[derive(Debug, Clone)]
pub struct GuardResult {
    pub allowed: bool,
    pub reason: Option<String>,
    pub guard_name: String,
}

impl GuardResult {
    pub fn allow(guard_name: impl Into<String>) -> Self {
        GuardResult {
            allowed: true,
            reason: None,
            guard_name: guard_name.into(),
        }
    }

    pub fn block(guard_name: impl Into<String>, reason: impl Into<String>) -> Self {
        GuardResult {
            allowed: false,
            reason: Some(reason.into()),
            guard_name: guard_name.into(),
        }
    }
}

/// Opaque reservation token payload.
///
/// Serialized to JSON and handed back as a string; `ts` pins commit and
/// release to the calendar buckets the reservation was taken in, regardless
/// of clock drift between reserve and commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ReservationToken {
    pub v: u8,
    pub w: String,
    pub a: Decimal,
    pub ts: chrono::DateTime<chrono::Utc>,
}

impl ReservationToken {
    pub(crate) const VERSION: u8 = 2;

    pub(crate) fn new(wallet_id: &str, amount: Decimal, ts: chrono::DateTime<chrono::Utc>) -> Self {
        ReservationToken {
            v: Self::VERSION,
            w: wallet_id.to_string(),
            a: amount,
            ts,
        }
    }

    pub(crate) fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::from)
    }

    pub(crate) fn decode(token: &str) -> Option<Self> {
        let parsed: ReservationToken = serde_json::from_str(token).ok()?;
        (parsed.v == Self::VERSION).then_some(parsed)
    }
}

/// A payment guard.
#[async_trait]
pub trait Guard: Send + Sync {
    /// Unique name within a chain.
    fn name(&self) -> &str;

    /// Non-mutating admission check.
    async fn check(&self, context: &PaymentContext) -> GuardResult;

    /// Atomically check and claim quota. Returns a token for stateful
    /// guards, `None` for stateless ones. Errors with [`Error::Guard`] when
    /// the reservation is refused; any provisional increments must have been
    /// rolled back by then.
    async fn reserve(&self, context: &PaymentContext) -> Result<Option<String>> {
        let result = self.check(context).await;
        if result.allowed {
            Ok(None)
        } else {
            Err(Error::Guard {
                guard: self.name().to_string(),
                reason: result.reason.unwrap_or_else(|| "blocked".into()),
            })
        }
    }

    /// Finalize a reservation. Must be idempotent for `None` tokens.
    async fn commit(&self, _token: Option<&str>) {}

    /// Roll back a reservation. Idempotent.
    async fn release(&self, _token: Option<&str>) {}

    /// Reset in-memory state. Storage-backed guards are reset through
    /// storage instead.
    fn reset(&self) {}
}

/// Ordered chain of guards with all-or-nothing reservation.
#[derive(Default, Clone)]
pub struct GuardChain {
    guards: Vec<Arc<dyn Guard>>,
}

impl GuardChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, guard: Arc<dyn Guard>) -> &mut Self {
        self.guards.push(guard);
        self
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.guards.iter().map(|g| g.name().to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Guard>> {
        self.guards.iter().find(|g| g.name() == name)
    }

    /// Run checks in insertion order, stopping at the first refusal.
    /// Returns the failing result plus the names that passed before it.
    pub async fn check(&self, context: &PaymentContext) -> (GuardResult, Vec<String>) {
        let mut passed = Vec::new();
        for guard in &self.guards {
            let result = guard.check(context).await;
            if !result.allowed {
                return (result, passed);
            }
            passed.push(guard.name().to_string());
        }
        (GuardResult::allow("chain"), passed)
    }

    /// Reserve every guard in order. On the first refusal all prior
    /// reservations are released in reverse and the refusal propagates.
    pub async fn reserve(&self, context: &PaymentContext) -> Result<Vec<(String, Option<String>)>> {
        let mut tokens: Vec<(String, Option<String>)> = Vec::new();
        for guard in &self.guards {
            match guard.reserve(context).await {
                Ok(token) => tokens.push((guard.name().to_string(), token)),
                Err(e) => {
                    self.release(&tokens).await;
                    return Err(e);
                }
            }
        }
        Ok(tokens)
    }

    /// Commit all reservations.
    pub async fn commit(&self, tokens: &[(String, Option<String>)]) {
        for (name, token) in tokens {
            if let Some(guard) = self.get(name) {
                guard.commit(token.as_deref()).await;
            }
        }
    }

    /// Release all reservations, most recent first.
    pub async fn release(&self, tokens: &[(String, Option<String>)]) {
        for (name, token) in tokens.iter().rev() {
            if let Some(guard) = self.get(name) {
                guard.release(token.as_deref()).await;
            }
        }
    }

    pub fn reset_all(&self) {
        for guard in &self.guards {
            guard.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGuard {
        name: String,
        allow: bool,
        reserved: AtomicUsize,
        released: AtomicUsize,
        committed: AtomicUsize,
    }

    impl CountingGuard {
        fn new(name: &str, allow: bool) -> Arc<Self> {
            Arc::new(CountingGuard {
                name: name.to_string(),
                allow,
                reserved: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                committed: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Guard for CountingGuard {
        fn name(&self) -> &str {
            &self.name
        }

        async fn check(&self, _context: &PaymentContext) -> GuardResult {
            if self.allow {
                GuardResult::allow(&self.name)
            } else {
                GuardResult::block(&self.name, "blocked by test guard")
            }
        }

        async fn reserve(&self, context: &PaymentContext) -> Result<Option<String>> {
            if !self.allow {
                return Err(Error::Guard {
                    guard: self.name.clone(),
                    reason: "blocked by test guard".into(),
                });
            }
            self.reserved.fetch_add(1, Ordering::SeqCst);
            Ok(Some(
                ReservationToken::new(&context.wallet_id, context.amount, chrono::Utc::now())
                    .encode()
                    .unwrap(),
            ))
        }

        async fn commit(&self, _token: Option<&str>) {
            self.committed.fetch_add(1, Ordering::SeqCst);
        }

        async fn release(&self, _token: Option<&str>) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn reserve_rolls_back_prior_guards_on_failure() {
        let first = CountingGuard::new("first", true);
        let second = CountingGuard::new("second", true);
        let blocker = CountingGuard::new("blocker", false);

        let mut chain = GuardChain::new();
        chain
            .add(first.clone())
            .add(second.clone())
            .add(blocker.clone());

        let context = PaymentContext::new("w-1", "0xabc", Decimal::ONE);
        let err = chain.reserve(&context).await.unwrap_err();
        assert!(matches!(err, Error::Guard { ref guard, .. } if guard == "blocker"));

        assert_eq!(first.reserved.load(Ordering::SeqCst), 1);
        assert_eq!(first.released.load(Ordering::SeqCst), 1);
        assert_eq!(second.released.load(Ordering::SeqCst), 1);
        assert_eq!(first.committed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn commit_reaches_every_guard() {
        let first = CountingGuard::new("first", true);
        let second = CountingGuard::new("second", true);
        let mut chain = GuardChain::new();
        chain.add(first.clone()).add(second.clone());

        let context = PaymentContext::new("w-1", "0xabc", Decimal::ONE);
        let tokens = chain.reserve(&context).await.unwrap();
        assert_eq!(tokens.len(), 2);
        chain.commit(&tokens).await;
        assert_eq!(first.committed.load(Ordering::SeqCst), 1);
        assert_eq!(second.committed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn check_reports_passed_guards() {
        let mut chain = GuardChain::new();
        chain
            .add(CountingGuard::new("a", true))
            .add(CountingGuard::new("b", false))
            .add(CountingGuard::new("c", true));

        let context = PaymentContext::new("w-1", "0xabc", Decimal::ONE);
        let (result, passed) = chain.check(&context).await;
        assert!(!result.allowed);
        assert_eq!(result.guard_name, "b");
        assert_eq!(passed, vec!["a".to_string()]);
    }

    #[test]
    fn reservation_token_round_trip() {
        let ts = chrono::Utc::now();
        let token = ReservationToken::new("w-1", Decimal::from(42), ts);
        let encoded = token.encode().unwrap();
        let decoded = ReservationToken::decode(&encoded).unwrap();
        assert_eq!(decoded.w, "w-1");
        assert_eq!(decoded.a, Decimal::from(42));
        assert_eq!(decoded.ts, ts);

        assert!(ReservationToken::decode("{\"v\":1}").is_none());
        assert!(ReservationToken::decode("not json").is_none());
    }
}
