//! Direct USDC transfer adapter (EVM and Solana addresses).

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::network::Network;
use crate::router::{AdapterRequest, AdapterSimulation, ProtocolAdapter};
use crate::types::{PaymentMethod, PaymentResult, PaymentStatus, TransactionState};
use crate::wallet::WalletService;

static EVM_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[a-fA-F0-9]{40}$").expect("static regex"));
static SOLANA_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").expect("static regex"));

pub(crate) fn is_evm_address(address: &str) -> bool {
    EVM_ADDRESS.is_match(address) && address.parse::<alloy_primitives::Address>().is_ok()
}

pub(crate) fn is_solana_address(address: &str) -> bool {
    if address.starts_with("0x") || !SOLANA_ADDRESS.is_match(address) {
        return false;
    }
    bs58::decode(address).into_vec().is_ok()
}

/// Fallback adapter for plain addresses on the source network.
pub struct TransferAdapter {
    wallets: Arc<WalletService>,
}

impl TransferAdapter {
    pub const PRIORITY: u8 = 50;

    pub fn new(wallets: Arc<WalletService>) -> Self {
        TransferAdapter { wallets }
    }
}

#[async_trait]
impl ProtocolAdapter for TransferAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Transfer
    }

    fn priority(&self) -> u8 {
        Self::PRIORITY
    }

    fn supports(
        &self,
        recipient: &str,
        source_network: Option<Network>,
        destination_chain: Option<Network>,
    ) -> bool {
        let Some(network) = source_network else {
            // Without network context, accept anything address-shaped.
            return is_evm_address(recipient) || is_solana_address(recipient);
        };
        // An explicit different destination is cross-chain territory.
        if destination_chain.is_some_and(|dest| dest != network) {
            return false;
        }
        if network.is_solana() {
            return is_solana_address(recipient);
        }
        if network.is_evm() {
            return is_evm_address(recipient);
        }
        false
    }

    async fn execute(&self, request: AdapterRequest) -> Result<PaymentResult> {
        let transfer = match self
            .wallets
            .transfer(
                &request.wallet_id,
                &request.recipient,
                request.amount,
                request.fee_level,
                request.idempotency_key.clone(),
                request.wait_for_completion,
                request.timeout_seconds,
            )
            .await
        {
            Ok(result) => result,
            Err(e @ (Error::Wallet { .. } | Error::InsufficientBalance { .. })) => {
                return Ok(PaymentResult::failure(
                    request.recipient,
                    request.amount,
                    self.method(),
                    e.to_string(),
                ));
            }
            Err(e) => return Err(e),
        };

        if !transfer.success {
            let mut result = PaymentResult::failure(
                request.recipient,
                request.amount,
                self.method(),
                transfer
                    .error
                    .unwrap_or_else(|| "transfer failed".to_string()),
            );
            result.transaction_id = transfer.transaction.as_ref().map(|tx| tx.id.clone());
            result.blockchain_tx = transfer.tx_hash;
            return Ok(result);
        }

        let tx = transfer.transaction.as_ref();
        let status = match tx.map(|t| t.state) {
            Some(TransactionState::Complete) => PaymentStatus::Completed,
            Some(state) if state.is_terminal() => PaymentStatus::Failed,
            _ => PaymentStatus::Processing,
        };

        let mut metadata = serde_json::Map::new();
        if let Some(purpose) = &request.purpose {
            metadata.insert("purpose".into(), Value::String(purpose.clone()));
        }
        metadata.insert(
            "fee_level".into(),
            Value::String(request.fee_level.to_string()),
        );
        if let Some(tx) = tx {
            metadata.insert("tx_state".into(), Value::String(tx.state.to_string()));
        }
        if let Some(key) = &request.idempotency_key {
            metadata.insert("idempotency_key".into(), Value::String(key.clone()));
        }

        Ok(PaymentResult {
            success: status != PaymentStatus::Failed,
            transaction_id: tx.map(|t| t.id.clone()),
            blockchain_tx: transfer.tx_hash,
            amount: request.amount,
            recipient: request.recipient,
            method: self.method(),
            status,
            error: None,
            guards_passed: Vec::new(),
            metadata,
            resource_data: None,
        })
    }

    async fn simulate(&self, request: &AdapterRequest) -> AdapterSimulation {
        if !self.supports(
            &request.recipient,
            request.source_network,
            request.destination_chain,
        ) {
            return AdapterSimulation::fail(format!(
                "Invalid address format: {}",
                request.recipient
            ));
        }

        match self.wallets.usdc_balance_amount(&request.wallet_id).await {
            Ok(balance) if balance >= request.amount => {
                let mut simulation = AdapterSimulation::ok();
                simulation.details.insert(
                    "remaining_balance".into(),
                    Value::String((balance - request.amount).to_string()),
                );
                simulation
            }
            Ok(balance) => AdapterSimulation::fail(format!(
                "Insufficient balance: {balance} < {}",
                request.amount
            )),
            Err(e) => AdapterSimulation::fail(format!("Balance check failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::MockWalletProvider;
    use rust_decimal::Decimal;

    fn adapter(provider: Arc<MockWalletProvider>) -> TransferAdapter {
        let config = Config::new("key", "secret", Network::EthSepolia).unwrap();
        TransferAdapter::new(Arc::new(WalletService::new(config, provider)))
    }

    const EVM: &str = "0x742d35cc6634c0532925a3b844bc9e7595f25e4a";
    const SOLANA: &str = "4Nd1mYbN8mLGyQ3i8qwPVLbGypbMBRqyYBt1TJC5VBiF";

    #[test]
    fn address_detection() {
        assert!(is_evm_address(EVM));
        assert!(!is_evm_address("0x123"));
        assert!(is_solana_address(SOLANA));
        assert!(!is_solana_address(EVM));
    }

    #[tokio::test]
    async fn supports_matches_source_network_family() {
        let provider = Arc::new(MockWalletProvider::new());
        let adapter = adapter(provider);

        assert!(adapter.supports(EVM, Some(Network::EthSepolia), None));
        assert!(!adapter.supports(SOLANA, Some(Network::EthSepolia), None));
        assert!(adapter.supports(SOLANA, Some(Network::SolDevnet), None));

        // Same destination as source is still a plain transfer.
        assert!(adapter.supports(EVM, Some(Network::EthSepolia), Some(Network::EthSepolia)));
        // Different destination is not.
        assert!(!adapter.supports(EVM, Some(Network::EthSepolia), Some(Network::BaseSepolia)));
    }

    #[tokio::test]
    async fn execute_completes_with_terminal_state() {
        let provider = Arc::new(MockWalletProvider::new());
        provider.add_wallet("w-1", Network::EthSepolia, "0xabc");
        provider.set_usdc_balance("w-1", Decimal::from(100));
        let adapter = adapter(provider.clone());

        let mut request = AdapterRequest::new("w-1", EVM, Decimal::ONE);
        request.source_network = Some(Network::EthSepolia);
        let result = adapter.execute(request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status, PaymentStatus::Completed);
        assert!(result.blockchain_tx.is_some());
        assert_eq!(provider.transfer_count(), 1);
    }

    #[tokio::test]
    async fn insufficient_balance_becomes_failed_result() {
        let provider = Arc::new(MockWalletProvider::new());
        provider.add_wallet("w-1", Network::EthSepolia, "0xabc");
        provider.set_usdc_balance("w-1", Decimal::ONE);
        let adapter = adapter(provider.clone());

        let mut request = AdapterRequest::new("w-1", EVM, Decimal::from(10));
        request.source_network = Some(Network::EthSepolia);
        let result = adapter.execute(request).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.status, PaymentStatus::Failed);
        assert!(result.error.unwrap().contains("insufficient balance"));
        assert_eq!(provider.transfer_count(), 0);
    }

    #[tokio::test]
    async fn simulate_checks_balance() {
        let provider = Arc::new(MockWalletProvider::new());
        provider.add_wallet("w-1", Network::EthSepolia, "0xabc");
        provider.set_usdc_balance("w-1", Decimal::from(2));
        let adapter = adapter(provider);

        let mut request = AdapterRequest::new("w-1", EVM, Decimal::ONE);
        request.source_network = Some(Network::EthSepolia);
        assert!(adapter.simulate(&request).await.would_succeed);

        request.amount = Decimal::from(5);
        let simulation = adapter.simulate(&request).await;
        assert!(!simulation.would_succeed);
        assert!(simulation.reason.unwrap().contains("Insufficient balance"));
    }
}
