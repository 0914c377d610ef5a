//! Payment intents: authorize-then-capture with fund reservation.
//!
//! Creating an intent reserves its amount against the wallet's available
//! balance (provider balance minus existing reservations) so a later direct
//! `pay` cannot double-spend the same funds. Confirmation releases the
//! reservation immediately before executing the real payment, so guard
//! reservations inside `pay` see the true balance.

use chrono::{Duration, Utc};
use rand::{Rng, rng};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::{StorageBackend, counter_value};
use crate::types::{PaymentIntent, PaymentIntentStatus};

const INTENTS: &str = "payment_intents";
const RESERVATIONS: &str = "fund_reservations";

/// Default intent lifetime when the caller does not pass one.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Per-wallet reserved-amount counters, independent of guard reservations.
#[derive(Clone)]
pub struct ReservationLedger {
    storage: Arc<dyn StorageBackend>,
}

impl ReservationLedger {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        ReservationLedger { storage }
    }

    fn key(wallet_id: &str) -> String {
        format!("reserved:{wallet_id}")
    }

    /// Add to the wallet's reserved total; returns the new total.
    pub async fn reserve(&self, wallet_id: &str, amount: Decimal) -> Result<Decimal> {
        self.storage
            .atomic_add(RESERVATIONS, &Self::key(wallet_id), amount)
            .await
    }

    /// Release part of the wallet's reserved total.
    pub async fn release(&self, wallet_id: &str, amount: Decimal) -> Result<Decimal> {
        self.storage
            .atomic_add(RESERVATIONS, &Self::key(wallet_id), -amount)
            .await
    }

    /// Current reserved total for a wallet (never negative).
    pub async fn total(&self, wallet_id: &str) -> Result<Decimal> {
        let value = self.storage.get(RESERVATIONS, &Self::key(wallet_id)).await?;
        Ok(counter_value(value.as_ref()).max(Decimal::ZERO))
    }
}

/// Stores intents and coordinates their fund reservations.
pub struct PaymentIntentService {
    storage: Arc<dyn StorageBackend>,
    reservations: ReservationLedger,
}

impl PaymentIntentService {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        PaymentIntentService {
            reservations: ReservationLedger::new(storage.clone()),
            storage,
        }
    }

    pub fn reservations(&self) -> &ReservationLedger {
        &self.reservations
    }

    /// Total reserved against a wallet; feeds `available_balance`.
    pub async fn reserved_total(&self, wallet_id: &str) -> Result<Decimal> {
        self.reservations.total(wallet_id).await
    }

    /// Create an intent in REQUIRES_CONFIRMATION with its amount reserved.
    ///
    /// `available_balance` is the wallet's provider balance; the reservation
    /// is taken atomically and rolled back if the new reserved total would
    /// exceed it.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        wallet_id: &str,
        recipient: &str,
        amount: Decimal,
        provider_balance: Decimal,
        purpose: Option<String>,
        expires_in_secs: Option<i64>,
        metadata: Map<String, Value>,
    ) -> Result<PaymentIntent> {
        if amount <= Decimal::ZERO {
            return Err(Error::Validation("intent amount must be positive".into()));
        }

        // Optimistically reserve, then verify against the provider balance.
        let reserved_total = self.reservations.reserve(wallet_id, amount).await?;
        if reserved_total > provider_balance {
            self.reservations.release(wallet_id, amount).await?;
            return Err(Error::InsufficientBalance {
                current: (provider_balance - (reserved_total - amount)).max(Decimal::ZERO),
                required: amount,
                wallet_id: Some(wallet_id.to_string()),
            });
        }

        let now = Utc::now();
        let intent = PaymentIntent {
            id: format!("pi_{}", Uuid::new_v4().simple()),
            wallet_id: wallet_id.to_string(),
            recipient: recipient.to_string(),
            amount,
            currency: "USDC".to_string(),
            status: PaymentIntentStatus::RequiresConfirmation,
            created_at: now,
            expires_at: Some(
                now + Duration::seconds(expires_in_secs.unwrap_or(DEFAULT_EXPIRES_IN_SECS)),
            ),
            purpose,
            cancel_reason: None,
            reserved_amount: Some(amount),
            metadata,
            client_secret: Some({
                let secret: [u8; 16] = rng().random();
                format!("pi_secret_{}", hex::encode(secret))
            }),
        };

        if let Err(e) = self
            .storage
            .save(INTENTS, &intent.id, serde_json::to_value(&intent)?)
            .await
        {
            self.reservations.release(wallet_id, amount).await?;
            return Err(e);
        }
        Ok(intent)
    }

    pub async fn get(&self, intent_id: &str) -> Result<Option<PaymentIntent>> {
        match self.storage.get(INTENTS, intent_id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Persist a status change. Does not touch reservations.
    pub async fn update_status(
        &self,
        intent_id: &str,
        status: PaymentIntentStatus,
        cancel_reason: Option<String>,
    ) -> Result<PaymentIntent> {
        let mut intent = self
            .get(intent_id)
            .await?
            .ok_or_else(|| Error::Validation(format!("Intent not found: {intent_id}")))?;
        intent.status = status;
        if cancel_reason.is_some() {
            intent.cancel_reason = cancel_reason;
        }
        if matches!(
            status,
            PaymentIntentStatus::Succeeded
                | PaymentIntentStatus::Canceled
                | PaymentIntentStatus::Failed
        ) {
            intent.reserved_amount = None;
        }
        self.storage
            .save(INTENTS, intent_id, serde_json::to_value(&intent)?)
            .await?;
        Ok(intent)
    }

    /// Begin confirmation: REQUIRES_CONFIRMATION -> PROCESSING, releasing
    /// the fund reservation so the actual payment sees the true balance.
    ///
    /// Expired intents move to FAILED with their reservation released and
    /// the confirmation attempt errors.
    pub async fn begin_confirmation(&self, intent_id: &str) -> Result<PaymentIntent> {
        let intent = self
            .get(intent_id)
            .await?
            .ok_or_else(|| Error::Validation(format!("Intent not found: {intent_id}")))?;

        if intent.status != PaymentIntentStatus::RequiresConfirmation {
            return Err(Error::Validation(format!(
                "Intent cannot be confirmed. Status: {:?}",
                intent.status
            )));
        }

        if intent.is_expired(Utc::now()) {
            if let Some(reserved) = intent.reserved_amount {
                self.reservations
                    .release(&intent.wallet_id, reserved)
                    .await?;
            }
            self.update_status(intent_id, PaymentIntentStatus::Failed, Some("expired".into()))
                .await?;
            return Err(Error::Payment(format!("Intent {intent_id} has expired")));
        }

        if let Some(reserved) = intent.reserved_amount {
            self.reservations
                .release(&intent.wallet_id, reserved)
                .await?;
        }
        self.update_status(intent_id, PaymentIntentStatus::Processing, None)
            .await
    }

    /// Cancel an unconfirmed intent and release its reservation.
    pub async fn cancel(&self, intent_id: &str, reason: Option<String>) -> Result<PaymentIntent> {
        let intent = self
            .get(intent_id)
            .await?
            .ok_or_else(|| Error::Validation(format!("Intent not found: {intent_id}")))?;

        if intent.status != PaymentIntentStatus::RequiresConfirmation {
            return Err(Error::Validation(format!(
                "Cannot cancel intent in status: {:?}",
                intent.status
            )));
        }

        if let Some(reserved) = intent.reserved_amount {
            self.reservations
                .release(&intent.wallet_id, reserved)
                .await?;
        }
        self.update_status(intent_id, PaymentIntentStatus::Canceled, reason)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn service() -> PaymentIntentService {
        PaymentIntentService::new(Arc::new(InMemoryStorage::new()))
    }

    #[tokio::test]
    async fn create_reserves_funds() {
        let service = service();
        let intent = service
            .create(
                "w-1",
                "0xabc",
                Decimal::from(80),
                Decimal::from(100),
                None,
                None,
                Map::new(),
            )
            .await
            .unwrap();

        assert_eq!(intent.status, PaymentIntentStatus::RequiresConfirmation);
        assert_eq!(intent.reserved_amount, Some(Decimal::from(80)));
        assert!(intent.client_secret.is_some());
        assert_eq!(service.reserved_total("w-1").await.unwrap(), Decimal::from(80));
    }

    #[tokio::test]
    async fn create_refuses_over_available_balance() {
        let service = service();
        service
            .create(
                "w-1",
                "0xabc",
                Decimal::from(80),
                Decimal::from(100),
                None,
                None,
                Map::new(),
            )
            .await
            .unwrap();

        // Second 80 does not fit against balance 100 with 80 reserved.
        let err = service
            .create(
                "w-1",
                "0xabc",
                Decimal::from(80),
                Decimal::from(100),
                None,
                None,
                Map::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
        // Failed creation did not leak a reservation.
        assert_eq!(service.reserved_total("w-1").await.unwrap(), Decimal::from(80));
    }

    #[tokio::test]
    async fn begin_confirmation_releases_reservation() {
        let service = service();
        let intent = service
            .create(
                "w-1",
                "0xabc",
                Decimal::from(30),
                Decimal::from(100),
                None,
                None,
                Map::new(),
            )
            .await
            .unwrap();

        let processing = service.begin_confirmation(&intent.id).await.unwrap();
        assert_eq!(processing.status, PaymentIntentStatus::Processing);
        assert_eq!(service.reserved_total("w-1").await.unwrap(), Decimal::ZERO);

        // A second confirmation attempt is rejected.
        assert!(service.begin_confirmation(&intent.id).await.is_err());
    }

    #[tokio::test]
    async fn expired_intent_fails_confirmation_and_releases() {
        let service = service();
        let intent = service
            .create(
                "w-1",
                "0xabc",
                Decimal::from(30),
                Decimal::from(100),
                None,
                Some(-1),
                Map::new(),
            )
            .await
            .unwrap();

        let err = service.begin_confirmation(&intent.id).await.unwrap_err();
        assert!(matches!(err, Error::Payment(ref m) if m.contains("expired")));
        assert_eq!(service.reserved_total("w-1").await.unwrap(), Decimal::ZERO);
        let failed = service.get(&intent.id).await.unwrap().unwrap();
        assert_eq!(failed.status, PaymentIntentStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_releases_reservation() {
        let service = service();
        let intent = service
            .create(
                "w-1",
                "0xabc",
                Decimal::from(30),
                Decimal::from(100),
                None,
                None,
                Map::new(),
            )
            .await
            .unwrap();

        let canceled = service
            .cancel(&intent.id, Some("changed my mind".into()))
            .await
            .unwrap();
        assert_eq!(canceled.status, PaymentIntentStatus::Canceled);
        assert_eq!(canceled.cancel_reason.as_deref(), Some("changed my mind"));
        assert_eq!(service.reserved_total("w-1").await.unwrap(), Decimal::ZERO);

        // Only REQUIRES_CONFIRMATION intents cancel.
        assert!(service.cancel(&intent.id, None).await.is_err());
    }
}
