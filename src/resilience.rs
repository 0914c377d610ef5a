//! Distributed circuit breaker.
//!
//! State and failure counters live in storage so multiple orchestrator
//! instances sharing a backend agree on whether a dependency is broken.
//! `CLOSED -> OPEN` after `failure_threshold` failures; after
//! `recovery_timeout` one probe runs in `HALF_OPEN` (success closes, failure
//! re-trips). Opening blocks entry with a structured error and never
//! auto-retries.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::storage::StorageBackend;

const COLLECTION: &str = "resilience";

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn parse(s: &str) -> CircuitState {
        match s {
            "open" => CircuitState::Open,
            "half_open" => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Breaker for one named external dependency.
#[derive(Clone)]
pub struct CircuitBreaker {
    service: String,
    storage: Arc<dyn StorageBackend>,
    failure_threshold: u32,
    recovery_timeout_secs: u64,
}

impl CircuitBreaker {
    pub fn new(
        service: impl Into<String>,
        storage: Arc<dyn StorageBackend>,
        failure_threshold: u32,
        recovery_timeout_secs: u64,
    ) -> Self {
        CircuitBreaker {
            service: service.into(),
            storage,
            failure_threshold,
            recovery_timeout_secs,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn state_key(&self) -> String {
        format!("circuit:{}:state", self.service)
    }

    fn failures_key(&self) -> String {
        format!("circuit:{}:failures", self.service)
    }

    fn recovery_key(&self) -> String {
        format!("circuit:{}:recovery_ts", self.service)
    }

    fn now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    pub async fn state(&self) -> CircuitState {
        let Ok(Some(doc)) = self.storage.get(COLLECTION, &self.state_key()).await else {
            return CircuitState::Closed;
        };
        doc.get("state")
            .and_then(Value::as_str)
            .map(CircuitState::parse)
            .unwrap_or(CircuitState::Closed)
    }

    async fn set_state(&self, state: CircuitState) {
        let _ = self
            .storage
            .save(
                COLLECTION,
                &self.state_key(),
                json!({"state": state.as_str()}),
            )
            .await;
        tracing::info!(service = %self.service, state = state.as_str(), "circuit state changed");
    }

    async fn recovery_time(&self) -> f64 {
        let Ok(Some(doc)) = self.storage.get(COLLECTION, &self.recovery_key()).await else {
            return 0.0;
        };
        doc.get("ts")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0)
    }

    /// Whether traffic may pass. OPEN circuits transition to HALF_OPEN once
    /// the recovery timeout has elapsed.
    pub async fn is_available(&self) -> bool {
        match self.state().await {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovery = self.recovery_time().await;
                if recovery == 0.0 || Self::now() > recovery {
                    tracing::info!(service = %self.service, "recovery timeout passed, half-open");
                    self.set_state(CircuitState::HalfOpen).await;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Error with the structured "circuit open" failure unless traffic may
    /// pass. Call before each guarded operation.
    pub async fn guard_entry(&self) -> Result<()> {
        if self.is_available().await {
            return Ok(());
        }
        Err(Error::CircuitOpen {
            service: self.service.clone(),
            retry_at: self.recovery_time().await,
        })
    }

    /// Record a failed call. In HALF_OPEN this re-trips immediately.
    pub async fn record_failure(&self) {
        if self.state().await == CircuitState::HalfOpen {
            tracing::warn!(service = %self.service, "failure in half-open, re-tripping");
            self.trip().await;
            return;
        }

        let failures = self
            .storage
            .atomic_add(COLLECTION, &self.failures_key(), Decimal::ONE)
            .await
            .ok()
            .and_then(|d| d.to_u32())
            .unwrap_or(0);
        tracing::warn!(
            service = %self.service,
            failures,
            threshold = self.failure_threshold,
            "failure recorded"
        );
        if failures >= self.failure_threshold {
            self.trip().await;
        }
    }

    /// Record a successful call. A HALF_OPEN probe success closes the
    /// circuit; in CLOSED the failure count decays by one per success so a
    /// single good call does not erase a burst of failures.
    pub async fn record_success(&self) {
        match self.state().await {
            CircuitState::HalfOpen => {
                tracing::info!(service = %self.service, "probe succeeded, closing circuit");
                self.close().await;
            }
            CircuitState::Closed => {
                let remaining = self
                    .storage
                    .atomic_add(COLLECTION, &self.failures_key(), -Decimal::ONE)
                    .await
                    .ok()
                    .and_then(|d| d.to_i64())
                    .unwrap_or(0);
                if remaining <= 0 {
                    let _ = self.storage.delete(COLLECTION, &self.failures_key()).await;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Trip to OPEN for `recovery_timeout` seconds.
    pub async fn trip(&self) {
        let recovery = Self::now() + self.recovery_timeout_secs as f64;
        self.set_state(CircuitState::Open).await;
        let _ = self
            .storage
            .save(
                COLLECTION,
                &self.recovery_key(),
                json!({"ts": recovery.to_string()}),
            )
            .await;
        tracing::error!(
            service = %self.service,
            recovery_timeout = self.recovery_timeout_secs,
            "circuit tripped"
        );
    }

    /// Close the circuit and clear counters.
    pub async fn close(&self) {
        self.set_state(CircuitState::Closed).await;
        let _ = self.storage.delete(COLLECTION, &self.failures_key()).await;
        let _ = self.storage.delete(COLLECTION, &self.recovery_key()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn breaker(threshold: u32, recovery_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test_service",
            Arc::new(InMemoryStorage::new()),
            threshold,
            recovery_secs,
        )
    }

    #[tokio::test]
    async fn trips_after_threshold_failures() {
        let breaker = breaker(3, 3600);
        assert_eq!(breaker.state().await, CircuitState::Closed);

        breaker.record_failure().await;
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        let err = breaker.guard_entry().await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { ref service, .. } if service == "test_service"));
    }

    #[tokio::test]
    async fn recovers_through_half_open() {
        let breaker = breaker(1, 0);
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        // Recovery timeout of zero: next availability check half-opens.
        assert!(breaker.is_available().await);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_re_trips() {
        let breaker = breaker(1, 0);
        breaker.record_failure().await;
        assert!(breaker.is_available().await); // half-open
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn success_decays_failure_count() {
        let breaker = breaker(3, 3600);
        breaker.record_failure().await;
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_failure().await;
        // 2 - 1 + 1 = 2 < 3: still closed.
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
