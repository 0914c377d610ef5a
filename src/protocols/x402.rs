//! HTTP 402 "Payment Required" adapter.
//!
//! Flow: GET the resource; on 402 parse the payment requirements (JSON body,
//! or the legacy base64 `X-Payment-Required` header), settle on chain —
//! same-chain transfer or CCTP fall-through when the seller sits on another
//! network — then retry the request with a `PAYMENT-SIGNATURE` proof header
//! and hand the resource body back to the caller.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::network::Network;
use crate::protocols::gateway::GatewayAdapter;
use crate::router::{AdapterRequest, AdapterSimulation, ProtocolAdapter};
use crate::types::{PaymentMethod, PaymentResult, PaymentStatus, from_usdc_units};
use crate::util::Base64Bytes;
use crate::wallet::WalletService;

/// V2 proof-of-payment request header.
pub const HEADER_PAYMENT_SIGNATURE: &str = "PAYMENT-SIGNATURE";
/// V2 settlement reference response header.
pub const HEADER_PAYMENT_RESPONSE: &str = "PAYMENT-RESPONSE";
/// V1 legacy requirements header (base64 JSON).
pub const HEADER_PAYMENT_REQUIRED_V1: &str = "X-Payment-Required";

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://").expect("static regex"));

/// Payment requirements parsed from a 402 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    /// Amount in USDC smallest units, as sent on the wire.
    pub max_amount_required: String,
    pub resource: String,
    pub description: String,
    pub recipient: String,
    pub extra: Option<Value>,
}

impl PaymentRequirements {
    /// Parse from a 402 JSON body. Accepts `{"requirements": {...}}` or the
    /// fields directly; `paymentAddress` and `recipient` are synonyms.
    pub fn from_json(body: &Value, resource_url: &str) -> Result<Self> {
        let data = body.get("requirements").unwrap_or(body);
        let recipient = data
            .get("paymentAddress")
            .or_else(|| data.get("recipient"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let max_amount_required = data
            .get("maxAmountRequired")
            .or_else(|| data.get("amount"))
            .and_then(Value::as_str)
            .unwrap_or("0")
            .to_string();
        if recipient.is_empty() && data.get("scheme").is_none() {
            return Err(Error::Protocol {
                protocol: "x402".into(),
                message: "no payment requirements in 402 body".into(),
            });
        }
        Ok(PaymentRequirements {
            scheme: data
                .get("scheme")
                .and_then(Value::as_str)
                .unwrap_or("exact")
                .to_string(),
            network: data
                .get("network")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            max_amount_required,
            resource: data
                .get("resource")
                .and_then(Value::as_str)
                .unwrap_or(resource_url)
                .to_string(),
            description: data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            recipient,
            extra: data.get("extra").cloned(),
        })
    }

    /// Parse the legacy V1 header: base64-encoded JSON.
    pub fn from_header(header_value: &str, resource_url: &str) -> Result<Self> {
        let decoded = Base64Bytes::from(header_value)
            .decode()
            .map_err(|e| Error::Protocol {
                protocol: "x402".into(),
                message: format!("bad X-Payment-Required header: {e}"),
            })?;
        let body: Value = serde_json::from_slice(&decoded).map_err(|e| Error::Protocol {
            protocol: "x402".into(),
            message: format!("bad X-Payment-Required JSON: {e}"),
        })?;
        Self::from_json(&body, resource_url)
    }

    /// Required amount in USDC. The wire value is in smallest units;
    /// non-integer values fall back to a plain decimal parse.
    pub fn amount_usdc(&self) -> Decimal {
        if let Ok(units) = self.max_amount_required.parse::<u64>() {
            return from_usdc_units(units);
        }
        Decimal::from_str(&self.max_amount_required).unwrap_or(Decimal::ZERO)
    }
}

/// V2 proof-of-payment payload, base64-JSON-encoded into
/// [`HEADER_PAYMENT_SIGNATURE`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u8,
    pub scheme: String,
    pub network: String,
    pub payload: Value,
    pub resource: String,
}

impl PaymentPayload {
    pub fn to_header(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(Base64Bytes::encode(json).to_string())
    }

    pub fn from_header(header: &str) -> Result<Self> {
        let decoded = Base64Bytes::from(header)
            .decode()
            .map_err(|e| Error::Protocol {
                protocol: "x402".into(),
                message: format!("bad payment payload header: {e}"),
            })?;
        serde_json::from_slice(&decoded).map_err(Error::from)
    }
}

/// Adapter for x402 HTTP paywalled resources. Priority 10: URLs always
/// route here first.
pub struct X402Adapter {
    config: Config,
    wallets: Arc<WalletService>,
    http: reqwest::Client,
}

impl X402Adapter {
    pub const PRIORITY: u8 = 10;

    pub fn new(config: Config, wallets: Arc<WalletService>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(config.http_timeout))
            .build()
            .unwrap_or_default();
        X402Adapter {
            config,
            wallets,
            http,
        }
    }

    async fn fetch_requirements(
        &self,
        url: &str,
    ) -> Result<(reqwest::StatusCode, Option<PaymentRequirements>, Option<Value>)> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if status.as_u16() != 402 {
            let body = response.json::<Value>().await.ok();
            return Ok((status, None, body));
        }

        let header = response
            .headers()
            .get(HEADER_PAYMENT_REQUIRED_V1)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.json::<Value>().await.ok();

        // Body first (V2), header as the V1 fallback.
        let requirements = body
            .as_ref()
            .and_then(|b| PaymentRequirements::from_json(b, url).ok())
            .or_else(|| {
                header
                    .as_deref()
                    .and_then(|h| PaymentRequirements::from_header(h, url).ok())
            });
        Ok((status, requirements, body))
    }

    /// Settle on chain and return `(transaction_id, tx_hash, cross_chain)`.
    async fn settle(
        &self,
        request: &AdapterRequest,
        requirements: &PaymentRequirements,
        amount: Decimal,
        seller_network: Network,
        agent_network: Network,
    ) -> std::result::Result<(Option<String>, Option<String>, bool), String> {
        if seller_network != agent_network {
            tracing::info!(
                source = %agent_network,
                dest = %seller_network,
                "x402 cross-chain settlement"
            );
            let gateway = GatewayAdapter::new(self.config.clone(), self.wallets.clone());
            let mut gateway_request = AdapterRequest::new(
                request.wallet_id.clone(),
                requirements.recipient.clone(),
                amount,
            );
            gateway_request.fee_level = request.fee_level;
            gateway_request.purpose = request.purpose.clone();
            gateway_request.idempotency_key = request.idempotency_key.clone();
            gateway_request.source_network = Some(agent_network);
            gateway_request.destination_chain = Some(seller_network);
            gateway_request.wait_for_completion = true;
            gateway_request.use_fast_transfer = request.use_fast_transfer;

            let result = gateway
                .execute(gateway_request)
                .await
                .map_err(|e| format!("Cross-chain transfer failed: {e}"))?;
            if !result.success {
                return Err(format!(
                    "Cross-chain transfer failed: {}",
                    result.error.unwrap_or_else(|| "unknown".into())
                ));
            }
            Ok((result.transaction_id, result.blockchain_tx, true))
        } else {
            let transfer = self
                .wallets
                .transfer(
                    &request.wallet_id,
                    &requirements.recipient,
                    amount,
                    request.fee_level,
                    request.idempotency_key.clone(),
                    true,
                    request.timeout_seconds,
                )
                .await
                .map_err(|e| format!("Transfer failed: {e}"))?;
            if !transfer.success {
                return Err(format!(
                    "Transfer failed: {}",
                    transfer.error.unwrap_or_else(|| "unknown".into())
                ));
            }
            Ok((
                transfer.transaction.map(|tx| tx.id),
                transfer.tx_hash,
                false,
            ))
        }
    }
}

#[async_trait]
impl ProtocolAdapter for X402Adapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::X402
    }

    fn priority(&self) -> u8 {
        Self::PRIORITY
    }

    fn supports(
        &self,
        recipient: &str,
        _source_network: Option<Network>,
        _destination_chain: Option<Network>,
    ) -> bool {
        URL_PATTERN.is_match(recipient)
    }

    async fn execute(&self, request: AdapterRequest) -> Result<PaymentResult> {
        let url = request.recipient.clone();

        let (status, requirements, body) = match self.fetch_requirements(&url).await {
            Ok(parts) => parts,
            Err(e) => {
                return Ok(PaymentResult::failure(
                    url,
                    request.amount,
                    self.method(),
                    format!("x402 error: {e}"),
                ));
            }
        };

        // Free resource: no 402, nothing to pay.
        if status.as_u16() != 402 {
            let mut result = PaymentResult {
                success: true,
                transaction_id: None,
                blockchain_tx: None,
                amount: Decimal::ZERO,
                recipient: url,
                method: self.method(),
                status: PaymentStatus::Completed,
                error: None,
                guards_passed: Vec::new(),
                metadata: Map::new(),
                resource_data: body,
            };
            result
                .metadata
                .insert("http_status".into(), Value::from(status.as_u16()));
            result
                .metadata
                .insert("note".into(), Value::String("No 402".into()));
            return Ok(result);
        }

        let Some(requirements) = requirements else {
            return Ok(PaymentResult::failure(
                url,
                request.amount,
                self.method(),
                "Server returned 402 but extraction failed",
            ));
        };

        let required_amount = requirements.amount_usdc();
        if required_amount > request.amount {
            return Ok(PaymentResult::failure(
                url,
                required_amount,
                self.method(),
                format!("Required {required_amount} > Max {}", request.amount),
            ));
        }
        if requirements.recipient.is_empty() {
            return Ok(PaymentResult::failure(
                url,
                required_amount,
                self.method(),
                "No payment address found in requirements",
            ));
        }

        // Resolve both sides of the settlement.
        let agent_network = match request.source_network {
            Some(network) => network,
            None => match self.wallets.wallet_network(&request.wallet_id).await {
                Ok(network) => network,
                Err(e) => {
                    return Ok(PaymentResult::failure(
                        url,
                        required_amount,
                        self.method(),
                        format!("x402 error: {e}"),
                    ));
                }
            },
        };
        let Ok(seller_network) = requirements.network.parse::<Network>() else {
            return Ok(PaymentResult::failure(
                url,
                required_amount,
                self.method(),
                format!(
                    "Invalid network in payment requirements: {}",
                    requirements.network
                ),
            ));
        };

        let (transaction_id, tx_hash, cross_chain) = match self
            .settle(
                &request,
                &requirements,
                required_amount,
                seller_network,
                agent_network,
            )
            .await
        {
            Ok(settled) => settled,
            Err(reason) => {
                return Ok(PaymentResult::failure(
                    url,
                    required_amount,
                    self.method(),
                    reason,
                ));
            }
        };

        // Build the V2 proof payload and retry the request.
        let from_address = self
            .wallets
            .get_wallet(&request.wallet_id)
            .await
            .map(|w| w.address)
            .unwrap_or_default();
        let payload = PaymentPayload {
            x402_version: 2,
            scheme: requirements.scheme.clone(),
            network: requirements.network.clone(),
            resource: url.clone(),
            payload: json!({
                "transactionHash": tx_hash,
                "fromAddress": from_address,
                "toAddress": requirements.recipient,
                "amount": required_amount.to_string(),
            }),
        };
        let header = match payload.to_header() {
            Ok(header) => header,
            Err(e) => {
                return Ok(PaymentResult::failure(
                    url,
                    required_amount,
                    self.method(),
                    format!("x402 error: {e}"),
                ));
            }
        };

        let final_response = match self
            .http
            .get(&url)
            .header(HEADER_PAYMENT_SIGNATURE, header)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // Payment already settled on chain; the ledger keeps the tx.
                let mut failure = PaymentResult::failure(
                    url,
                    required_amount,
                    self.method(),
                    format!("x402 access error after settlement: {e}"),
                );
                failure.transaction_id = transaction_id;
                failure.blockchain_tx = tx_hash;
                return Ok(failure);
            }
        };

        let final_status = final_response.status();
        if final_status.is_success() {
            let payment_response = final_response
                .headers()
                .get(HEADER_PAYMENT_RESPONSE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let resource_data = final_response.json::<Value>().await.ok();

            let mut metadata = Map::new();
            metadata.insert("http_status".into(), Value::from(final_status.as_u16()));
            metadata.insert(
                "payment_response".into(),
                Value::String(payment_response),
            );
            metadata.insert("cross_chain".into(), Value::Bool(cross_chain));
            if cross_chain {
                metadata.insert("cctp_version".into(), Value::String("v2".into()));
            }

            Ok(PaymentResult {
                success: true,
                transaction_id,
                blockchain_tx: tx_hash,
                amount: required_amount,
                recipient: url,
                method: self.method(),
                status: PaymentStatus::Completed,
                error: None,
                guards_passed: Vec::new(),
                metadata,
                resource_data,
            })
        } else {
            let mut failure = PaymentResult::failure(
                url,
                required_amount,
                self.method(),
                format!("Rejected: HTTP {}", final_status.as_u16()),
            );
            failure.transaction_id = transaction_id;
            failure.blockchain_tx = tx_hash;
            Ok(failure)
        }
    }

    async fn simulate(&self, request: &AdapterRequest) -> AdapterSimulation {
        if !self.supports(&request.recipient, None, None) {
            return AdapterSimulation::fail(format!(
                "Invalid URL format: {}",
                request.recipient
            ));
        }

        let (status, requirements, _) = match self.fetch_requirements(&request.recipient).await {
            Ok(parts) => parts,
            Err(e) => return AdapterSimulation::fail(format!("Error checking URL: {e}")),
        };

        if status.as_u16() != 402 {
            let mut simulation = AdapterSimulation::ok();
            simulation.reason = Some("Resource does not require payment".into());
            simulation
                .details
                .insert("http_status".into(), Value::from(status.as_u16()));
            return simulation;
        }

        let Some(requirements) = requirements else {
            return AdapterSimulation::fail("No payment requirements in 402 response");
        };

        let required = requirements.amount_usdc();
        if required > request.amount {
            return AdapterSimulation::fail(format!(
                "Required amount {required} exceeds max {}",
                request.amount
            ));
        }

        match self.wallets.usdc_balance_amount(&request.wallet_id).await {
            Ok(balance) if balance >= required => {
                let mut simulation = AdapterSimulation::ok();
                simulation
                    .details
                    .insert("required_amount".into(), Value::String(required.to_string()));
                simulation.details.insert(
                    "payment_address".into(),
                    Value::String(requirements.recipient.clone()),
                );
                simulation.details.insert(
                    "description".into(),
                    Value::String(requirements.description.clone()),
                );
                simulation
            }
            Ok(balance) => {
                AdapterSimulation::fail(format!("Insufficient balance: {balance} < {required}"))
            }
            Err(e) => AdapterSimulation::fail(format!("Balance check failed: {e}")),
        }
    }
}
