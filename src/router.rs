//! Payment router: priority-ordered capability dispatch.
//!
//! Adapters register with an integer priority (lower wins); selection walks
//! the sorted list and takes the first adapter whose `supports` accepts the
//! recipient for the resolved source network and requested destination. No
//! match yields a synthetic failed result rather than an error, and the
//! router never retries.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::network::Network;
use crate::types::{FeeLevel, PaymentMethod, PaymentResult, SimulationResult};
use crate::wallet::WalletService;

/// Everything an adapter needs to execute one payment.
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    pub wallet_id: String,
    pub recipient: String,
    pub amount: Decimal,
    pub fee_level: FeeLevel,
    pub idempotency_key: Option<String>,
    pub purpose: Option<String>,
    pub destination_chain: Option<Network>,
    /// Resolved from the wallet by the router so adapters never consult
    /// global state.
    pub source_network: Option<Network>,
    pub wait_for_completion: bool,
    pub timeout_seconds: Option<f64>,
    /// CCTP Fast Transfer (seconds) vs Standard (minutes).
    pub use_fast_transfer: bool,
}

impl AdapterRequest {
    pub fn new(wallet_id: impl Into<String>, recipient: impl Into<String>, amount: Decimal) -> Self {
        AdapterRequest {
            wallet_id: wallet_id.into(),
            recipient: recipient.into(),
            amount,
            fee_level: FeeLevel::Medium,
            idempotency_key: None,
            purpose: None,
            destination_chain: None,
            source_network: None,
            wait_for_completion: false,
            timeout_seconds: None,
            use_fast_transfer: true,
        }
    }
}

/// Best-effort simulation outcome from an adapter.
#[derive(Debug, Clone, Default)]
pub struct AdapterSimulation {
    pub would_succeed: bool,
    pub reason: Option<String>,
    pub estimated_fee: Option<Decimal>,
    pub details: Map<String, Value>,
}

impl AdapterSimulation {
    pub fn ok() -> Self {
        AdapterSimulation {
            would_succeed: true,
            ..Default::default()
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        AdapterSimulation {
            would_succeed: false,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// A protocol adapter: one way of moving USDC to a recipient.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Which method this adapter implements.
    fn method(&self) -> PaymentMethod;

    /// Routing priority; lower value wins. Ties resolve by registration
    /// order.
    fn priority(&self) -> u8;

    /// Whether this adapter can carry a payment to `recipient`.
    fn supports(
        &self,
        recipient: &str,
        source_network: Option<Network>,
        destination_chain: Option<Network>,
    ) -> bool;

    /// Execute the payment. Logical failures come back as a failed
    /// [`PaymentResult`]; only infrastructure breakage errors.
    async fn execute(&self, request: AdapterRequest) -> Result<PaymentResult>;

    /// Estimate whether the payment would succeed, without side effects.
    async fn simulate(&self, request: &AdapterRequest) -> AdapterSimulation;
}

/// Routes payments to the appropriate protocol adapter.
pub struct PaymentRouter {
    wallets: Arc<WalletService>,
    adapters: Vec<Arc<dyn ProtocolAdapter>>,
}

impl PaymentRouter {
    pub fn new(wallets: Arc<WalletService>) -> Self {
        PaymentRouter {
            wallets,
            adapters: Vec::new(),
        }
    }

    /// Register an adapter, keeping the list sorted ascending by priority.
    /// Stable sort preserves registration order among equal priorities.
    pub fn register_adapter(&mut self, adapter: Arc<dyn ProtocolAdapter>) {
        self.adapters.push(adapter);
        self.adapters.sort_by_key(|a| a.priority());
    }

    /// Drop every adapter implementing `method`.
    pub fn unregister_adapter(&mut self, method: PaymentMethod) {
        self.adapters.retain(|a| a.method() != method);
    }

    pub fn adapters(&self) -> &[Arc<dyn ProtocolAdapter>] {
        &self.adapters
    }

    fn find_adapter(
        &self,
        recipient: &str,
        source_network: Option<Network>,
        destination_chain: Option<Network>,
    ) -> Option<&Arc<dyn ProtocolAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.supports(recipient, source_network, destination_chain))
    }

    /// Which method would carry a payment to `recipient`, if any.
    pub fn detect_method(
        &self,
        recipient: &str,
        source_network: Option<Network>,
        destination_chain: Option<Network>,
    ) -> Option<PaymentMethod> {
        self.find_adapter(recipient, source_network, destination_chain)
            .map(|a| a.method())
    }

    /// Whether any adapter accepts `recipient` (without network context).
    pub fn can_handle(&self, recipient: &str) -> bool {
        self.find_adapter(recipient, None, None).is_some()
    }

    /// Human-readable recipient formats per method.
    pub fn supported_formats(&self) -> HashMap<PaymentMethod, &'static str> {
        HashMap::from([
            (
                PaymentMethod::Transfer,
                "Blockchain address (0x... for EVM, Base58 for Solana)",
            ),
            (PaymentMethod::X402, "HTTPS URL (https://api.example.com)"),
            (
                PaymentMethod::Crosschain,
                "Address plus an explicit destination chain",
            ),
        ])
    }

    /// Resolve the source network, pick an adapter, and execute.
    pub async fn pay(&self, mut request: AdapterRequest) -> Result<PaymentResult> {
        if request.source_network.is_none() {
            request.source_network = Some(self.wallets.wallet_network(&request.wallet_id).await?);
        }

        let Some(adapter) = self.find_adapter(
            &request.recipient,
            request.source_network,
            request.destination_chain,
        ) else {
            tracing::error!(recipient = %request.recipient, "no adapter found");
            return Ok(PaymentResult::failure(
                request.recipient.clone(),
                request.amount,
                PaymentMethod::Transfer,
                format!("No adapter found for recipient: {}", request.recipient),
            ));
        };

        tracing::debug!(
            method = %adapter.method(),
            recipient = %request.recipient,
            "routing payment"
        );
        adapter.execute(request).await
    }

    /// Same selection as [`PaymentRouter::pay`], then the adapter's
    /// simulation mapped into a [`SimulationResult`].
    pub async fn simulate(&self, mut request: AdapterRequest) -> Result<SimulationResult> {
        if request.source_network.is_none() {
            request.source_network = Some(self.wallets.wallet_network(&request.wallet_id).await?);
        }

        let Some(adapter) = self.find_adapter(
            &request.recipient,
            request.source_network,
            request.destination_chain,
        ) else {
            return Ok(SimulationResult {
                would_succeed: false,
                route: PaymentMethod::Transfer,
                estimated_fee: None,
                reason: Some(format!(
                    "No adapter found for recipient: {}",
                    request.recipient
                )),
            });
        };

        let simulation = adapter.simulate(&request).await;
        Ok(SimulationResult {
            would_succeed: simulation.would_succeed,
            route: adapter.method(),
            estimated_fee: simulation.estimated_fee,
            reason: simulation.reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::MockWalletProvider;

    struct FixedAdapter {
        method: PaymentMethod,
        priority: u8,
        accepts: &'static str,
    }

    #[async_trait]
    impl ProtocolAdapter for FixedAdapter {
        fn method(&self) -> PaymentMethod {
            self.method
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn supports(
            &self,
            recipient: &str,
            _source_network: Option<Network>,
            _destination_chain: Option<Network>,
        ) -> bool {
            recipient.starts_with(self.accepts)
        }

        async fn execute(&self, request: AdapterRequest) -> Result<PaymentResult> {
            let mut result = PaymentResult::failure(
                request.recipient,
                request.amount,
                self.method,
                "unused",
            );
            result.success = true;
            result.error = None;
            result.status = crate::types::PaymentStatus::Completed;
            Ok(result)
        }

        async fn simulate(&self, _request: &AdapterRequest) -> AdapterSimulation {
            AdapterSimulation::ok()
        }
    }

    fn router() -> PaymentRouter {
        let provider = Arc::new(MockWalletProvider::new());
        provider.add_wallet("w-1", Network::EthSepolia, "0xabc");
        let config = Config::new("key", "secret", Network::EthSepolia).unwrap();
        PaymentRouter::new(Arc::new(WalletService::new(config, provider)))
    }

    #[tokio::test]
    async fn priority_order_wins() {
        let mut router = router();
        // Registered out of order; both accept "0x".
        router.register_adapter(Arc::new(FixedAdapter {
            method: PaymentMethod::Transfer,
            priority: 50,
            accepts: "0x",
        }));
        router.register_adapter(Arc::new(FixedAdapter {
            method: PaymentMethod::Crosschain,
            priority: 30,
            accepts: "0x",
        }));

        assert_eq!(
            router.detect_method("0xabc", None, None),
            Some(PaymentMethod::Crosschain)
        );
    }

    #[tokio::test]
    async fn no_adapter_yields_synthetic_failure() {
        let mut router = router();
        router.register_adapter(Arc::new(FixedAdapter {
            method: PaymentMethod::X402,
            priority: 10,
            accepts: "https://",
        }));

        let result = router
            .pay(AdapterRequest::new("w-1", "0xnothing", Decimal::ONE))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.status, crate::types::PaymentStatus::Failed);
        assert!(result.error.unwrap().contains("No adapter found"));

        let sim = router
            .simulate(AdapterRequest::new("w-1", "0xnothing", Decimal::ONE))
            .await
            .unwrap();
        assert!(!sim.would_succeed);
    }

    #[tokio::test]
    async fn execute_reaches_matching_adapter() {
        let mut router = router();
        router.register_adapter(Arc::new(FixedAdapter {
            method: PaymentMethod::X402,
            priority: 10,
            accepts: "https://",
        }));
        let result = router
            .pay(AdapterRequest::new(
                "w-1",
                "https://api.example.com",
                Decimal::ONE,
            ))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.method, PaymentMethod::X402);
    }

    #[tokio::test]
    async fn unregister_removes_method() {
        let mut router = router();
        router.register_adapter(Arc::new(FixedAdapter {
            method: PaymentMethod::X402,
            priority: 10,
            accepts: "https://",
        }));
        assert!(router.can_handle("https://x.example"));
        router.unregister_adapter(PaymentMethod::X402);
        assert!(!router.can_handle("https://x.example"));
    }
}
