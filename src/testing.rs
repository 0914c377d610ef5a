//! Shared test support: an in-process wallet provider with scriptable
//! balances and transaction outcomes.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::network::Network;
use crate::provider::{ContractExecutionParams, TransferParams, WalletProvider};
use crate::types::{
    AccountType, Balance, CustodyType, TokenInfo, TransactionInfo, TransactionState, WalletInfo,
    WalletSetInfo, WalletState,
};

/// Scriptable in-memory [`WalletProvider`] for tests.
///
/// Transfers and contract executions immediately reach `COMPLETE` with a
/// synthetic tx hash unless [`MockWalletProvider::fail_transfers`] is set.
#[derive(Default)]
pub struct MockWalletProvider {
    wallets: DashMap<String, WalletInfo>,
    usdc_balances: DashMap<String, Decimal>,
    native_balances: DashMap<String, Decimal>,
    transactions: DashMap<String, TransactionInfo>,
    transfer_calls: AtomicUsize,
    contract_calls: AtomicUsize,
    fail_transfers: std::sync::atomic::AtomicBool,
}

impl MockWalletProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_wallet(&self, wallet_id: &str, network: Network, address: &str) {
        self.wallets.insert(
            wallet_id.to_string(),
            WalletInfo {
                id: wallet_id.to_string(),
                address: address.to_string(),
                blockchain: network.as_str().to_string(),
                state: WalletState::Live,
                wallet_set_id: "ws-test".to_string(),
                custody_type: CustodyType::Developer,
                account_type: AccountType::Eoa,
                name: None,
                create_date: None,
                update_date: None,
            },
        );
    }

    pub fn remove_wallet(&self, wallet_id: &str) {
        self.wallets.remove(wallet_id);
    }

    pub fn set_usdc_balance(&self, wallet_id: &str, amount: Decimal) {
        self.usdc_balances.insert(wallet_id.to_string(), amount);
    }

    pub fn set_native_balance(&self, wallet_id: &str, amount: Decimal) {
        self.native_balances.insert(wallet_id.to_string(), amount);
    }

    pub fn fail_transfers(&self, fail: bool) {
        self.fail_transfers.store(fail, Ordering::SeqCst);
    }

    pub fn transfer_count(&self) -> usize {
        self.transfer_calls.load(Ordering::SeqCst)
    }

    pub fn contract_call_count(&self) -> usize {
        self.contract_calls.load(Ordering::SeqCst)
    }

    fn make_transaction(&self, wallet_id: &str, state: TransactionState) -> TransactionInfo {
        let id = format!("tx-{}", Uuid::new_v4());
        let tx = TransactionInfo {
            id: id.clone(),
            state,
            blockchain: self
                .wallets
                .get(wallet_id)
                .map(|w| w.blockchain.clone()),
            tx_hash: Some(format!("0x{}", Uuid::new_v4().simple())),
            wallet_id: Some(wallet_id.to_string()),
            source_address: None,
            destination_address: None,
            token_id: None,
            amounts: Vec::new(),
            fee_level: None,
            create_date: None,
            update_date: None,
            error_reason: if state == TransactionState::Failed {
                Some("scripted failure".into())
            } else {
                None
            },
        };
        self.transactions.insert(id, tx.clone());
        tx
    }

    fn usdc_token(blockchain: &str) -> TokenInfo {
        TokenInfo {
            id: "token-usdc".into(),
            blockchain: blockchain.to_string(),
            symbol: "USDC".into(),
            name: "USD Coin".into(),
            decimals: 6,
            is_native: false,
            token_address: None,
            standard: None,
        }
    }

    fn native_token(blockchain: &str) -> TokenInfo {
        TokenInfo {
            id: "token-native".into(),
            blockchain: blockchain.to_string(),
            symbol: "ETH".into(),
            name: "Ether".into(),
            decimals: 18,
            is_native: true,
            token_address: None,
            standard: None,
        }
    }
}

#[async_trait]
impl WalletProvider for MockWalletProvider {
    async fn create_wallet_set(&self, name: &str) -> Result<WalletSetInfo> {
        Ok(WalletSetInfo {
            id: format!("ws-{}", Uuid::new_v4()),
            name: Some(name.to_string()),
            custody_type: CustodyType::Developer,
            create_date: None,
            update_date: None,
        })
    }

    async fn list_wallet_sets(&self) -> Result<Vec<WalletSetInfo>> {
        Ok(Vec::new())
    }

    async fn get_wallet_set(&self, wallet_set_id: &str) -> Result<WalletSetInfo> {
        Ok(WalletSetInfo {
            id: wallet_set_id.to_string(),
            name: None,
            custody_type: CustodyType::Developer,
            create_date: None,
            update_date: None,
        })
    }

    async fn create_wallets(
        &self,
        wallet_set_id: &str,
        blockchain: Network,
        count: u32,
        _account_type: AccountType,
    ) -> Result<Vec<WalletInfo>> {
        let mut created = Vec::new();
        for _ in 0..count {
            let id = format!("w-{}", Uuid::new_v4());
            self.add_wallet(&id, blockchain, &format!("0x{}", Uuid::new_v4().simple()));
            if let Some(mut wallet) = self.wallets.get_mut(&id) {
                wallet.wallet_set_id = wallet_set_id.to_string();
            }
            created.push(self.wallets.get(&id).unwrap().clone());
        }
        Ok(created)
    }

    async fn get_wallet(&self, wallet_id: &str) -> Result<WalletInfo> {
        self.wallets
            .get(wallet_id)
            .map(|w| w.clone())
            .ok_or_else(|| Error::Wallet {
                message: "wallet not found".into(),
                wallet_id: Some(wallet_id.to_string()),
            })
    }

    async fn list_wallets(
        &self,
        wallet_set_id: Option<&str>,
        blockchain: Option<Network>,
    ) -> Result<Vec<WalletInfo>> {
        Ok(self
            .wallets
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|w| wallet_set_id.is_none_or(|set| w.wallet_set_id == set))
            .filter(|w| blockchain.is_none_or(|chain| w.blockchain == chain.as_str()))
            .collect())
    }

    async fn get_wallet_balances(&self, wallet_id: &str) -> Result<Vec<Balance>> {
        let blockchain = self
            .wallets
            .get(wallet_id)
            .map(|w| w.blockchain.clone())
            .unwrap_or_else(|| "ETH-SEPOLIA".to_string());
        let mut balances = Vec::new();
        if let Some(amount) = self.usdc_balances.get(wallet_id) {
            balances.push(Balance {
                amount: *amount,
                token: Self::usdc_token(&blockchain),
            });
        }
        if let Some(amount) = self.native_balances.get(wallet_id) {
            balances.push(Balance {
                amount: *amount,
                token: Self::native_token(&blockchain),
            });
        }
        Ok(balances)
    }

    async fn create_transfer(&self, params: TransferParams) -> Result<TransactionInfo> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        let state = if self.fail_transfers.load(Ordering::SeqCst) {
            TransactionState::Failed
        } else {
            TransactionState::Complete
        };
        Ok(self.make_transaction(&params.wallet_id, state))
    }

    async fn create_contract_execution(
        &self,
        params: ContractExecutionParams,
    ) -> Result<TransactionInfo> {
        self.contract_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.make_transaction(&params.wallet_id, TransactionState::Complete))
    }

    async fn get_transaction(&self, transaction_id: &str) -> Result<TransactionInfo> {
        self.transactions
            .get(transaction_id)
            .map(|tx| tx.clone())
            .ok_or_else(|| Error::Payment(format!("unknown transaction {transaction_id}")))
    }

    async fn list_transactions(
        &self,
        wallet_id: Option<&str>,
        _blockchain: Option<Network>,
    ) -> Result<Vec<TransactionInfo>> {
        Ok(self
            .transactions
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|tx| wallet_id.is_none_or(|w| tx.wallet_id.as_deref() == Some(w)))
            .collect())
    }
}

/// Convenience: a provider wrapped in `Arc` with one funded wallet.
pub fn funded_provider(
    wallet_id: &str,
    network: Network,
    address: &str,
    usdc: Decimal,
) -> Arc<MockWalletProvider> {
    let provider = Arc::new(MockWalletProvider::new());
    provider.add_wallet(wallet_id, network, address);
    provider.set_usdc_balance(wallet_id, usdc);
    provider
}
