//! Core type definitions for the payment orchestrator.
//!
//! Mirrors the wallet provider's wire objects (wallets, balances,
//! transactions) and defines the orchestrator's own request/result types.
//! All USDC amounts are [`Decimal`] values with 6 fractional digits; amounts
//! in "smallest units" are integers obtained via [`to_usdc_units`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

use crate::network::Network;

/// Number of decimal places USDC carries on every supported network.
pub const USDC_DECIMALS: u32 = 6;

/// Convert a USDC decimal amount into smallest units (micro-USDC).
///
/// Truncates anything below 10^-6; negative amounts yield `None`.
pub fn to_usdc_units(amount: Decimal) -> Option<u64> {
    let scaled = amount * Decimal::from(1_000_000u64);
    scaled.trunc().to_u64()
}

/// Convert smallest units (micro-USDC) back into a USDC decimal amount.
pub fn from_usdc_units(units: u64) -> Decimal {
    Decimal::from(units) / Decimal::from(1_000_000u64)
}

/// Fee level forwarded to the wallet provider for gas pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeeLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl Display for FeeLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FeeLevel::Low => "LOW",
            FeeLevel::Medium => "MEDIUM",
            FeeLevel::High => "HIGH",
        };
        write!(f, "{s}")
    }
}

/// Wallet account type at the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    /// Smart contract account.
    Sca,
    /// Externally owned account.
    #[default]
    Eoa,
}

/// Wallet custody type at the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CustodyType {
    Developer,
    Enduser,
}

/// Wallet lifecycle state at the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WalletState {
    Live,
    Frozen,
}

/// Transaction state as reported by the wallet provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionState {
    Initiated,
    Pending,
    Queued,
    Sent,
    Confirmed,
    Complete,
    Failed,
    Cancelled,
    Cleared,
}

impl TransactionState {
    /// True once the provider will no longer change the state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Complete
                | TransactionState::Failed
                | TransactionState::Cancelled
                | TransactionState::Cleared
        )
    }

    /// True for terminal states where the transfer went through.
    pub fn is_successful(&self) -> bool {
        matches!(self, TransactionState::Complete | TransactionState::Cleared)
    }
}

impl Display for TransactionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Token metadata from the wallet provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub id: String,
    pub blockchain: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u32,
    #[serde(default)]
    pub is_native: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard: Option<String>,
}

/// A single token balance on a wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    #[serde(with = "decimal_string")]
    pub amount: Decimal,
    pub token: TokenInfo,
}

impl Balance {
    /// Token symbol shorthand.
    pub fn currency(&self) -> &str {
        &self.token.symbol
    }
}

/// Wallet set metadata from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSetInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub custody_type: CustodyType,
    #[serde(default)]
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_date: Option<DateTime<Utc>>,
}

/// Wallet metadata from the provider. Read-only to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInfo {
    pub id: String,
    pub address: String,
    pub blockchain: String,
    pub state: WalletState,
    pub wallet_set_id: String,
    pub custody_type: CustodyType,
    pub account_type: AccountType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_date: Option<DateTime<Utc>>,
}

impl WalletInfo {
    /// Parse the provider's blockchain string into a [`Network`].
    pub fn network(&self) -> Result<Network, crate::network::UnknownNetwork> {
        self.blockchain.parse()
    }
}

/// Transaction metadata from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub id: String,
    pub state: TransactionState,
    #[serde(default)]
    pub blockchain: Option<String>,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub wallet_id: Option<String>,
    #[serde(default)]
    pub source_address: Option<String>,
    #[serde(default)]
    pub destination_address: Option<String>,
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub amounts: Vec<String>,
    #[serde(default)]
    pub fee_level: Option<FeeLevel>,
    #[serde(default)]
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_reason: Option<String>,
}

impl TransactionInfo {
    /// True once the provider will no longer change the state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// True for terminal states where the transfer went through.
    pub fn is_successful(&self) -> bool {
        self.state.is_successful()
    }
}

/// Payment method selected by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// HTTP 402 paywalled resource.
    X402,
    /// Direct wallet-to-address transfer.
    Transfer,
    /// Cross-chain transfer over CCTP.
    Crosschain,
}

impl Display for PaymentMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentMethod::X402 => "x402",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::Crosschain => "crosschain",
        };
        write!(f, "{s}")
    }
}

/// Status of a payment as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Blocked,
}

/// A payment request, as used by [`crate::client::AgentPay::batch_pay`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub wallet_id: String,
    pub recipient: String,
    #[serde(with = "decimal_string")]
    pub amount: Decimal,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub destination_chain: Option<Network>,
    #[serde(default)]
    pub wallet_set_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Result of a payment operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResult {
    pub success: bool,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub blockchain_tx: Option<String>,
    #[serde(with = "decimal_string")]
    pub amount: Decimal,
    pub recipient: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub guards_passed: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Response body returned by an x402 resource after settlement.
    #[serde(default)]
    pub resource_data: Option<Value>,
}

impl PaymentResult {
    /// Synthetic failure with no provider interaction.
    pub fn failure(
        recipient: impl Into<String>,
        amount: Decimal,
        method: PaymentMethod,
        error: impl Into<String>,
    ) -> Self {
        PaymentResult {
            success: false,
            transaction_id: None,
            blockchain_tx: None,
            amount,
            recipient: recipient.into(),
            method,
            status: PaymentStatus::Failed,
            error: Some(error.into()),
            guards_passed: Vec::new(),
            metadata: Map::new(),
            resource_data: None,
        }
    }
}

/// Result of a payment simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub would_succeed: bool,
    pub route: PaymentMethod,
    #[serde(default)]
    pub estimated_fee: Option<Decimal>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Result of a batch payment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPaymentResult {
    pub total_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub results: Vec<PaymentResult>,
    pub transaction_ids: Vec<String>,
}

/// Status of a [`PaymentIntent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    /// Created and funds reserved; ready to confirm.
    RequiresConfirmation,
    /// Confirmation accepted, execution in progress.
    Processing,
    /// Executed successfully.
    Succeeded,
    /// Cancelled before confirmation.
    Canceled,
    /// Execution failed or the intent expired.
    Failed,
}

/// An authorize-then-capture payment intent with a fund reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub wallet_id: String,
    pub recipient: String,
    #[serde(with = "decimal_string")]
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentIntentStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub reserved_amount: Option<Decimal>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl PaymentIntent {
    /// True if the intent has an expiry in the past.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

/// Serialize [`Decimal`] as a string on the wire, matching the provider's
/// decimal-string amount encoding.
pub(crate) mod decimal_string {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        let s = String::deserialize(deserializer)?;
        Decimal::from_str(&s).map_err(serde::de::Error::custom)
    }
}
