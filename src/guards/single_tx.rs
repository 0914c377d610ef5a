//! Single-transaction amount guard. Stateless.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{Guard, GuardResult, PaymentContext};

/// Bounds the amount of any one payment. Boundary values are allowed.
pub struct SingleTxGuard {
    name: String,
    max_amount: Decimal,
    min_amount: Option<Decimal>,
}

impl SingleTxGuard {
    pub fn new(name: impl Into<String>, max_amount: Decimal, min_amount: Option<Decimal>) -> Self {
        SingleTxGuard {
            name: name.into(),
            max_amount,
            min_amount,
        }
    }
}

#[async_trait]
impl Guard for SingleTxGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, context: &PaymentContext) -> GuardResult {
        if context.amount > self.max_amount {
            return GuardResult::block(
                &self.name,
                format!(
                    "Amount {} exceeds max per transaction {}",
                    context.amount, self.max_amount
                ),
            );
        }
        if let Some(min) = self.min_amount {
            if context.amount < min {
                return GuardResult::block(
                    &self.name,
                    format!("Amount {} below min per transaction {min}", context.amount),
                );
            }
        }
        GuardResult::allow(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn boundary_amounts_are_allowed() {
        let guard = SingleTxGuard::new(
            "single_tx",
            Decimal::from(5),
            Some(Decimal::from_str("0.5").unwrap()),
        );

        let exact_max = PaymentContext::new("w", "0xabc", Decimal::from(5));
        assert!(guard.check(&exact_max).await.allowed);

        let exact_min = PaymentContext::new("w", "0xabc", Decimal::from_str("0.5").unwrap());
        assert!(guard.check(&exact_min).await.allowed);
    }

    #[tokio::test]
    async fn out_of_range_amounts_are_blocked() {
        let guard = SingleTxGuard::new("single_tx", Decimal::from(5), Some(Decimal::ONE));

        let over = PaymentContext::new("w", "0xabc", Decimal::from(10));
        let result = guard.check(&over).await;
        assert!(!result.allowed);
        assert!(result.reason.unwrap().contains("max"));

        let under = PaymentContext::new("w", "0xabc", Decimal::from_str("0.1").unwrap());
        let result = guard.check(&under).await;
        assert!(!result.allowed);
        assert!(result.reason.unwrap().contains("min"));
    }

    #[tokio::test]
    async fn reserve_is_stateless_check() {
        let guard = SingleTxGuard::new("single_tx", Decimal::from(5), None);
        let context = PaymentContext::new("w", "0xabc", Decimal::from(3));
        let token = guard.reserve(&context).await.unwrap();
        assert!(token.is_none());
    }
}
