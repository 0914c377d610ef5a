//! High-level wallet operations over the provider seam.
//!
//! Wraps [`WalletProvider`] with balance helpers, a USDC transfer path with
//! optional completion polling, and a small wallet-info cache.

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{Duration, sleep};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::network::Network;
use crate::provider::{TransferParams, WalletProvider};
use crate::types::{
    AccountType, Balance, FeeLevel, TransactionInfo, TransactionState, WalletInfo, WalletSetInfo,
};

/// Result of a wallet transfer.
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub success: bool,
    pub transaction: Option<TransactionInfo>,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

impl TransferResult {
    /// True while the provider has not reached a terminal state.
    pub fn is_pending(&self) -> bool {
        self.transaction
            .as_ref()
            .is_some_and(|tx| !tx.is_terminal())
    }
}

/// Wallet management service shared by the router, adapters, and facade.
pub struct WalletService {
    provider: Arc<dyn WalletProvider>,
    config: Config,
    wallet_cache: DashMap<String, WalletInfo>,
}

impl WalletService {
    pub fn new(config: Config, provider: Arc<dyn WalletProvider>) -> Self {
        WalletService {
            provider,
            config,
            wallet_cache: DashMap::new(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn WalletProvider> {
        &self.provider
    }

    // ---- wallet sets -----------------------------------------------------

    pub async fn create_wallet_set(&self, name: &str) -> Result<WalletSetInfo> {
        self.provider.create_wallet_set(name).await
    }

    pub async fn list_wallet_sets(&self) -> Result<Vec<WalletSetInfo>> {
        self.provider.list_wallet_sets().await
    }

    // ---- wallets ---------------------------------------------------------

    pub async fn create_wallet(
        &self,
        wallet_set_id: &str,
        blockchain: Option<Network>,
        account_type: AccountType,
    ) -> Result<WalletInfo> {
        let network = blockchain.unwrap_or(self.config.network);
        let wallets = self
            .provider
            .create_wallets(wallet_set_id, network, 1, account_type)
            .await?;
        let wallet = wallets.into_iter().next().ok_or_else(|| Error::Wallet {
            message: "provider created no wallets".into(),
            wallet_id: None,
        })?;
        self.wallet_cache.insert(wallet.id.clone(), wallet.clone());
        Ok(wallet)
    }

    /// Get a wallet, served from the cache when possible.
    pub async fn get_wallet(&self, wallet_id: &str) -> Result<WalletInfo> {
        if let Some(cached) = self.wallet_cache.get(wallet_id) {
            return Ok(cached.clone());
        }
        let wallet = self.provider.get_wallet(wallet_id).await?;
        self.wallet_cache.insert(wallet.id.clone(), wallet.clone());
        Ok(wallet)
    }

    /// Resolve the source [`Network`] of a wallet.
    pub async fn wallet_network(&self, wallet_id: &str) -> Result<Network> {
        let wallet = self.get_wallet(wallet_id).await?;
        wallet.network().map_err(|e| Error::Wallet {
            message: e.to_string(),
            wallet_id: Some(wallet_id.to_string()),
        })
    }

    pub async fn list_wallets(
        &self,
        wallet_set_id: Option<&str>,
        blockchain: Option<Network>,
    ) -> Result<Vec<WalletInfo>> {
        self.provider.list_wallets(wallet_set_id, blockchain).await
    }

    pub async fn list_transactions(
        &self,
        wallet_id: Option<&str>,
        blockchain: Option<Network>,
    ) -> Result<Vec<TransactionInfo>> {
        self.provider.list_transactions(wallet_id, blockchain).await
    }

    pub fn clear_cache(&self) {
        self.wallet_cache.clear();
    }

    // ---- balances --------------------------------------------------------

    pub async fn get_balances(&self, wallet_id: &str) -> Result<Vec<Balance>> {
        self.provider.get_wallet_balances(wallet_id).await
    }

    /// USDC balance, or a wallet error when the wallet holds no USDC token.
    pub async fn get_usdc_balance(&self, wallet_id: &str) -> Result<Balance> {
        let balances = self.get_balances(wallet_id).await?;
        balances
            .into_iter()
            .find(|b| b.token.symbol.eq_ignore_ascii_case("USDC"))
            .ok_or_else(|| Error::Wallet {
                message: "wallet has no USDC balance".into(),
                wallet_id: Some(wallet_id.to_string()),
            })
    }

    /// USDC balance amount; zero when the wallet holds no USDC token.
    pub async fn usdc_balance_amount(&self, wallet_id: &str) -> Result<Decimal> {
        match self.get_usdc_balance(wallet_id).await {
            Ok(balance) => Ok(balance.amount),
            Err(Error::Wallet { .. }) => Ok(Decimal::ZERO),
            Err(e) => Err(e),
        }
    }

    /// Native gas token balance amount; zero when absent.
    pub async fn native_balance_amount(&self, wallet_id: &str) -> Result<Decimal> {
        let balances = self.get_balances(wallet_id).await?;
        Ok(balances
            .into_iter()
            .find(|b| b.token.is_native)
            .map(|b| b.amount)
            .unwrap_or(Decimal::ZERO))
    }

    /// Provider-internal token id for USDC on this wallet's chain.
    pub async fn find_usdc_token_id(&self, wallet_id: &str) -> Result<Option<String>> {
        let balances = self.get_balances(wallet_id).await?;
        Ok(balances
            .into_iter()
            .find(|b| b.token.symbol.eq_ignore_ascii_case("USDC"))
            .map(|b| b.token.id))
    }

    /// Raise [`Error::InsufficientBalance`] unless the wallet holds at least
    /// `required` USDC.
    pub async fn ensure_sufficient_balance(
        &self,
        wallet_id: &str,
        required: Decimal,
    ) -> Result<Balance> {
        let balance = match self.get_usdc_balance(wallet_id).await {
            Ok(balance) => balance,
            Err(Error::Wallet { .. }) => {
                return Err(Error::InsufficientBalance {
                    current: Decimal::ZERO,
                    required,
                    wallet_id: Some(wallet_id.to_string()),
                });
            }
            Err(e) => return Err(e),
        };
        if balance.amount < required {
            return Err(Error::InsufficientBalance {
                current: balance.amount,
                required,
                wallet_id: Some(wallet_id.to_string()),
            });
        }
        Ok(balance)
    }

    // ---- transfers -------------------------------------------------------

    /// Transfer USDC out of a wallet.
    ///
    /// Balance-checks first, forwards the idempotency key to the provider,
    /// and optionally polls the transaction until terminal or timeout.
    #[allow(clippy::too_many_arguments)]
    pub async fn transfer(
        &self,
        wallet_id: &str,
        destination_address: &str,
        amount: Decimal,
        fee_level: FeeLevel,
        idempotency_key: Option<String>,
        wait_for_completion: bool,
        timeout_seconds: Option<f64>,
    ) -> Result<TransferResult> {
        self.ensure_sufficient_balance(wallet_id, amount).await?;

        let Some(token_id) = self.find_usdc_token_id(wallet_id).await? else {
            return Ok(TransferResult {
                success: false,
                transaction: None,
                tx_hash: None,
                error: Some("cannot find USDC token id on wallet".into()),
            });
        };

        let mut tx = match self
            .provider
            .create_transfer(TransferParams {
                wallet_id: wallet_id.to_string(),
                token_id,
                destination_address: destination_address.to_string(),
                amount: amount.to_string(),
                fee_level,
                idempotency_key,
            })
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                return Ok(TransferResult {
                    success: false,
                    transaction: None,
                    tx_hash: None,
                    error: Some(e.to_string()),
                });
            }
        };

        if wait_for_completion {
            let timeout = timeout_seconds.unwrap_or(self.config.transaction_poll_timeout);
            tx = self.wait_for_transaction(&tx.id, timeout).await?;
        }

        let success = if tx.is_terminal() {
            tx.is_successful()
        } else {
            true
        };
        Ok(TransferResult {
            success,
            tx_hash: tx.tx_hash.clone(),
            error: if tx.state == TransactionState::Failed {
                tx.error_reason
                    .clone()
                    .or_else(|| Some("transfer failed at provider".into()))
            } else {
                None
            },
            transaction: Some(tx),
        })
    }

    /// Poll a transaction until terminal or until the timeout elapses.
    /// Returns the last observed state either way.
    pub async fn wait_for_transaction(
        &self,
        transaction_id: &str,
        timeout_seconds: f64,
    ) -> Result<TransactionInfo> {
        let started = Instant::now();
        let interval = Duration::from_secs_f64(self.config.transaction_poll_interval);
        loop {
            let tx = self.provider.get_transaction(transaction_id).await?;
            if tx.is_terminal() {
                return Ok(tx);
            }
            if started.elapsed().as_secs_f64() >= timeout_seconds {
                return Ok(tx);
            }
            sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockWalletProvider;
    use std::str::FromStr;

    fn service(provider: Arc<MockWalletProvider>) -> WalletService {
        let mut config = Config::new("key", "secret", Network::EthSepolia).unwrap();
        config.transaction_poll_interval = 0.01;
        WalletService::new(config, provider)
    }

    #[tokio::test]
    async fn usdc_balance_helpers() {
        let provider = Arc::new(MockWalletProvider::new());
        provider.add_wallet("w-1", Network::EthSepolia, "0xabc");
        provider.set_usdc_balance("w-1", Decimal::from(100));
        let wallets = service(provider);

        assert_eq!(
            wallets.usdc_balance_amount("w-1").await.unwrap(),
            Decimal::from(100)
        );
        assert!(wallets
            .ensure_sufficient_balance("w-1", Decimal::from(50))
            .await
            .is_ok());
        let err = wallets
            .ensure_sufficient_balance("w-1", Decimal::from(150))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
    }

    #[tokio::test]
    async fn transfer_happy_path() {
        let provider = Arc::new(MockWalletProvider::new());
        provider.add_wallet("w-1", Network::EthSepolia, "0xabc");
        provider.set_usdc_balance("w-1", Decimal::from(10));
        let wallets = service(provider.clone());

        let result = wallets
            .transfer(
                "w-1",
                "0x742d35cc6634c0532925a3b844bc9e7595f25e4a",
                Decimal::from_str("1.5").unwrap(),
                FeeLevel::Medium,
                Some("idk-1".into()),
                true,
                Some(1.0),
            )
            .await
            .unwrap();
        assert!(result.success, "error: {:?}", result.error);
        assert!(result.tx_hash.is_some());
        assert_eq!(provider.transfer_count(), 1);
    }

    #[tokio::test]
    async fn transfer_insufficient_balance_is_an_error() {
        let provider = Arc::new(MockWalletProvider::new());
        provider.add_wallet("w-1", Network::EthSepolia, "0xabc");
        provider.set_usdc_balance("w-1", Decimal::ONE);
        let wallets = service(provider.clone());

        let err = wallets
            .transfer(
                "w-1",
                "0x742d35cc6634c0532925a3b844bc9e7595f25e4a",
                Decimal::from(5),
                FeeLevel::Medium,
                None,
                false,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
        // No provider call happened.
        assert_eq!(provider.transfer_count(), 0);
    }

    #[tokio::test]
    async fn wallet_cache_serves_second_read() {
        let provider = Arc::new(MockWalletProvider::new());
        provider.add_wallet("w-1", Network::BaseSepolia, "0xabc");
        let wallets = service(provider.clone());

        assert_eq!(
            wallets.wallet_network("w-1").await.unwrap(),
            Network::BaseSepolia
        );
        provider.remove_wallet("w-1");
        // Still resolvable from cache.
        assert_eq!(
            wallets.wallet_network("w-1").await.unwrap(),
            Network::BaseSepolia
        );
    }
}
