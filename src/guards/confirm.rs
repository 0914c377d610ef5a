//! Human-in-the-loop confirmation guard.
//!
//! Payments at or above the threshold (or all of them with
//! `always_confirm`) are approved through an operator-supplied async
//! callback. Without a callback the guard blocks with a reason the caller
//! can surface to a human reviewer.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use rust_decimal::Decimal;
use std::sync::Arc;

use super::{Guard, GuardResult, PaymentContext};

/// Operator callback deciding whether a payment may proceed.
pub type ConfirmCallback =
    Arc<dyn Fn(&PaymentContext) -> BoxFuture<'static, bool> + Send + Sync>;

/// Guard requiring explicit approval above a threshold.
pub struct ConfirmGuard {
    name: String,
    threshold: Option<Decimal>,
    always_confirm: bool,
    callback: Option<ConfirmCallback>,
}

impl ConfirmGuard {
    pub fn new(
        name: impl Into<String>,
        threshold: Option<Decimal>,
        always_confirm: bool,
        callback: Option<ConfirmCallback>,
    ) -> Self {
        ConfirmGuard {
            name: name.into(),
            threshold,
            always_confirm,
            callback,
        }
    }

    fn needs_confirmation(&self, amount: Decimal) -> bool {
        if self.always_confirm {
            return true;
        }
        self.threshold.is_some_and(|threshold| amount >= threshold)
    }
}

#[async_trait]
impl Guard for ConfirmGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, context: &PaymentContext) -> GuardResult {
        if !self.needs_confirmation(context.amount) {
            return GuardResult::allow(&self.name);
        }
        match &self.callback {
            Some(callback) => {
                if callback(context).await {
                    GuardResult::allow(&self.name)
                } else {
                    GuardResult::block(
                        &self.name,
                        format!("Payment of {} denied by confirmation handler", context.amount),
                    )
                }
            }
            None => GuardResult::block(
                &self.name,
                format!(
                    "Payment of {} requires confirmation but no handler is registered",
                    context.amount
                ),
            ),
        }
    }
}
