//! Custodial wallet provider interface.
//!
//! The orchestrator never holds key material; it asks the provider to sign
//! and submit by wallet id. [`WalletProvider`] is the narrow seam consumed
//! by the rest of the crate, and [`HttpWalletProvider`] is the REST-backed
//! implementation. The entity secret rides along on write calls and is never
//! exposed past this module.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::network::Network;
use crate::types::{
    AccountType, Balance, FeeLevel, TransactionInfo, WalletInfo, WalletSetInfo,
};

/// Parameters for a token transfer submitted to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct TransferParams {
    pub wallet_id: String,
    pub token_id: String,
    pub destination_address: String,
    /// Decimal string amount, e.g. `"1.5"`.
    pub amount: String,
    pub fee_level: FeeLevel,
    pub idempotency_key: Option<String>,
}

/// Parameters for an arbitrary contract call submitted to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct ContractExecutionParams {
    pub wallet_id: String,
    pub contract_address: String,
    /// ABI function signature, e.g. `"approve(address,uint256)"`.
    pub abi_function_signature: String,
    /// Stringified ABI parameters in declaration order.
    pub abi_parameters: Vec<String>,
    pub fee_level: FeeLevel,
    pub idempotency_key: Option<String>,
}

/// Narrow interface onto the custodial wallet provider.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn create_wallet_set(&self, name: &str) -> Result<WalletSetInfo>;
    async fn list_wallet_sets(&self) -> Result<Vec<WalletSetInfo>>;
    async fn get_wallet_set(&self, wallet_set_id: &str) -> Result<WalletSetInfo>;
    async fn create_wallets(
        &self,
        wallet_set_id: &str,
        blockchain: Network,
        count: u32,
        account_type: AccountType,
    ) -> Result<Vec<WalletInfo>>;
    async fn get_wallet(&self, wallet_id: &str) -> Result<WalletInfo>;
    async fn list_wallets(
        &self,
        wallet_set_id: Option<&str>,
        blockchain: Option<Network>,
    ) -> Result<Vec<WalletInfo>>;
    async fn get_wallet_balances(&self, wallet_id: &str) -> Result<Vec<Balance>>;
    async fn create_transfer(&self, params: TransferParams) -> Result<TransactionInfo>;
    async fn create_contract_execution(
        &self,
        params: ContractExecutionParams,
    ) -> Result<TransactionInfo>;
    async fn get_transaction(&self, transaction_id: &str) -> Result<TransactionInfo>;
    async fn list_transactions(
        &self,
        wallet_id: Option<&str>,
        blockchain: Option<Network>,
    ) -> Result<Vec<TransactionInfo>>;
}

/// REST implementation of [`WalletProvider`].
pub struct HttpWalletProvider {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    entity_secret: String,
}

impl HttpWalletProvider {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(config.http_timeout))
            .build()
            .map_err(Error::from)?;
        Ok(HttpWalletProvider {
            http,
            base_url: config.provider_base_url.clone(),
            api_key: config.api_key.clone(),
            entity_secret: config.entity_secret.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Configuration(format!("bad provider path {path}: {e}")))
    }

    /// The provider expects a fresh ciphertext of the entity secret on each
    /// write. The secret stays opaque to the rest of the crate.
    fn entity_secret_ciphertext(&self) -> String {
        self.entity_secret.clone()
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .get(url.clone())
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await?;
        Self::read_body(response, &url).await
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .post(url.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        Self::read_body(response, &url).await
    }

    async fn read_body(response: reqwest::Response, url: &Url) -> Result<Value> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::Wallet {
                message: format!("provider returned 404 for {url}"),
                wallet_id: None,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Network {
                message: format!("provider error: {body}"),
                status: Some(status.as_u16()),
                url: Some(url.to_string()),
            });
        }
        let envelope: Value = response.json().await?;
        // Responses arrive wrapped in a {"data": ...} envelope.
        Ok(envelope.get("data").cloned().unwrap_or(envelope))
    }

    fn parse_list<T: serde::de::DeserializeOwned>(data: &Value, field: &str) -> Result<Vec<T>> {
        let items = data.get(field).cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(items).map_err(Error::from)
    }
}

#[async_trait]
impl WalletProvider for HttpWalletProvider {
    async fn create_wallet_set(&self, name: &str) -> Result<WalletSetInfo> {
        let data = self
            .post_json(
                "developer/walletSets",
                json!({
                    "idempotencyKey": Uuid::new_v4().to_string(),
                    "entitySecretCiphertext": self.entity_secret_ciphertext(),
                    "name": name,
                }),
            )
            .await?;
        let wallet_set = data.get("walletSet").cloned().unwrap_or(data);
        serde_json::from_value(wallet_set).map_err(Error::from)
    }

    async fn list_wallet_sets(&self) -> Result<Vec<WalletSetInfo>> {
        let data = self.get_json("walletSets", &[]).await?;
        Self::parse_list(&data, "walletSets")
    }

    async fn get_wallet_set(&self, wallet_set_id: &str) -> Result<WalletSetInfo> {
        let data = self
            .get_json(&format!("walletSets/{wallet_set_id}"), &[])
            .await?;
        let wallet_set = data.get("walletSet").cloned().unwrap_or(data);
        serde_json::from_value(wallet_set).map_err(Error::from)
    }

    async fn create_wallets(
        &self,
        wallet_set_id: &str,
        blockchain: Network,
        count: u32,
        account_type: AccountType,
    ) -> Result<Vec<WalletInfo>> {
        let data = self
            .post_json(
                "developer/wallets",
                json!({
                    "idempotencyKey": Uuid::new_v4().to_string(),
                    "entitySecretCiphertext": self.entity_secret_ciphertext(),
                    "walletSetId": wallet_set_id,
                    "blockchains": [blockchain.as_str()],
                    "count": count,
                    "accountType": account_type,
                }),
            )
            .await?;
        Self::parse_list(&data, "wallets")
    }

    async fn get_wallet(&self, wallet_id: &str) -> Result<WalletInfo> {
        let data = self.get_json(&format!("wallets/{wallet_id}"), &[]).await?;
        let wallet = data.get("wallet").cloned().unwrap_or(data);
        serde_json::from_value(wallet).map_err(|e| Error::Wallet {
            message: format!("unreadable wallet payload: {e}"),
            wallet_id: Some(wallet_id.to_string()),
        })
    }

    async fn list_wallets(
        &self,
        wallet_set_id: Option<&str>,
        blockchain: Option<Network>,
    ) -> Result<Vec<WalletInfo>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(set_id) = wallet_set_id {
            query.push(("walletSetId", set_id.to_string()));
        }
        if let Some(chain) = blockchain {
            query.push(("blockchain", chain.as_str().to_string()));
        }
        let data = self.get_json("wallets", &query).await?;
        Self::parse_list(&data, "wallets")
    }

    async fn get_wallet_balances(&self, wallet_id: &str) -> Result<Vec<Balance>> {
        let data = self
            .get_json(&format!("wallets/{wallet_id}/balances"), &[])
            .await?;
        Self::parse_list(&data, "tokenBalances")
    }

    async fn create_transfer(&self, params: TransferParams) -> Result<TransactionInfo> {
        let mut body = Map::new();
        body.insert(
            "idempotencyKey".into(),
            Value::String(
                params
                    .idempotency_key
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
            ),
        );
        body.insert(
            "entitySecretCiphertext".into(),
            Value::String(self.entity_secret_ciphertext()),
        );
        body.insert("walletId".into(), Value::String(params.wallet_id));
        body.insert("tokenId".into(), Value::String(params.token_id));
        body.insert(
            "destinationAddress".into(),
            Value::String(params.destination_address),
        );
        body.insert("amounts".into(), json!([params.amount]));
        body.insert("feeLevel".into(), serde_json::to_value(params.fee_level)?);

        let data = self
            .post_json("developer/transactions/transfer", Value::Object(body))
            .await?;
        parse_transaction(data)
    }

    async fn create_contract_execution(
        &self,
        params: ContractExecutionParams,
    ) -> Result<TransactionInfo> {
        let data = self
            .post_json(
                "developer/transactions/contractExecution",
                json!({
                    "idempotencyKey": params
                        .idempotency_key
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                    "entitySecretCiphertext": self.entity_secret_ciphertext(),
                    "walletId": params.wallet_id,
                    "contractAddress": params.contract_address,
                    "abiFunctionSignature": params.abi_function_signature,
                    "abiParameters": params.abi_parameters,
                    "feeLevel": params.fee_level,
                }),
            )
            .await?;
        parse_transaction(data)
    }

    async fn get_transaction(&self, transaction_id: &str) -> Result<TransactionInfo> {
        let data = self
            .get_json(&format!("transactions/{transaction_id}"), &[])
            .await?;
        parse_transaction(data)
    }

    async fn list_transactions(
        &self,
        wallet_id: Option<&str>,
        blockchain: Option<Network>,
    ) -> Result<Vec<TransactionInfo>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(id) = wallet_id {
            query.push(("walletIds", id.to_string()));
        }
        if let Some(chain) = blockchain {
            query.push(("blockchain", chain.as_str().to_string()));
        }
        let data = self.get_json("transactions", &query).await?;
        Self::parse_list(&data, "transactions")
    }
}

fn parse_transaction(data: Value) -> Result<TransactionInfo> {
    let tx = data.get("transaction").cloned().unwrap_or(data);
    serde_json::from_value(tx).map_err(Error::from)
}
