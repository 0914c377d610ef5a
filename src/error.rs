//! Error taxonomy for the payment orchestrator.
//!
//! Business failures inside `pay` surface as a failed
//! [`PaymentResult`](crate::types::PaymentResult); the variants here cover
//! configuration problems, refused reservations, and unexpected failures
//! that propagate to the caller after reservations are released.

use rust_decimal::Decimal;

use crate::trust::types::TrustVerdict;

/// Stage at which an x402 exchange failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum X402Stage {
    /// Parsing payment requirements out of the 402 response.
    Requirements,
    /// Verifying the declared requirements against caller limits.
    Verification,
    /// Settling the payment on chain.
    Settlement,
    /// Accessing the resource after settlement.
    Access,
}

impl std::fmt::Display for X402Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            X402Stage::Requirements => "requirements",
            X402Stage::Verification => "verification",
            X402Stage::Settlement => "settlement",
            X402Stage::Access => "access",
        };
        write!(f, "{s}")
    }
}

/// Mechanism through which a cross-chain transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrosschainStage {
    BridgeKit,
    Cctp,
    Gateway,
}

impl std::fmt::Display for CrosschainStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CrosschainStage::BridgeKit => "bridge_kit",
            CrosschainStage::Cctp => "cctp",
            CrosschainStage::Gateway => "gateway",
        };
        write!(f, "{s}")
    }
}

/// Errors produced by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid credentials/configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A wallet operation was refused or the wallet is unusable.
    #[error("wallet error: {message}")]
    Wallet {
        message: String,
        wallet_id: Option<String>,
    },

    /// The router or an adapter failed logically.
    #[error("payment error: {0}")]
    Payment(String),

    /// A guard refused to reserve quota for the payment.
    #[error("[{guard}] {reason}")]
    Guard { guard: String, reason: String },

    /// The wallet does not hold enough available USDC.
    #[error(
        "insufficient balance: have {current}, need {required} (shortfall {})",
        .required - .current
    )]
    InsufficientBalance {
        current: Decimal,
        required: Decimal,
        wallet_id: Option<String>,
    },

    /// HTTP or RPC communication failure.
    #[error("network error: {message}")]
    Network {
        message: String,
        status: Option<u16>,
        url: Option<String>,
    },

    /// Malformed protocol payload (e.g. unreadable x402 requirements).
    #[error("[{protocol}] {message}")]
    Protocol { protocol: String, message: String },

    /// x402 exchange failed at a specific stage.
    #[error("[x402:{stage}] {message} (url: {url})")]
    X402 {
        url: String,
        stage: X402Stage,
        message: String,
    },

    /// Cross-chain transfer failed.
    #[error("[crosschain:{stage}] {message} ({source_chain} -> {destination})")]
    Crosschain {
        source_chain: String,
        destination: String,
        stage: CrosschainStage,
        message: String,
    },

    /// Transaction polling exceeded its budget.
    #[error(
        "transaction {transaction_id} timed out after {waited_seconds}s (last state: {last_state})"
    )]
    TransactionTimeout {
        transaction_id: String,
        last_state: String,
        waited_seconds: f64,
    },

    /// An idempotency key was reused with different parameters.
    #[error("idempotency conflict for key {key}: {message}")]
    Idempotency { key: String, message: String },

    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// The trust gate refused the recipient.
    #[error("trust gate {verdict:?}: {reason}")]
    TrustRefused {
        verdict: TrustVerdict,
        reason: String,
    },

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A circuit breaker is open for the named service.
    #[error("circuit open for {service}, retry after unix time {retry_at}")]
    CircuitOpen { service: String, retry_at: f64 },
}

impl Error {
    /// Shorthand for a [`Error::Network`] without status/url context.
    pub fn network(message: impl Into<String>) -> Self {
        Error::Network {
            message: message.into(),
            status: None,
            url: None,
        }
    }

    /// True when the failure was an HTTP 429 from a dependency.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::Network { status: Some(429), .. })
    }

    /// True when the failure was a 5xx from a dependency.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Network { status: Some(s), .. } if (500u16..600).contains(s))
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network {
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
            url: err.url().map(|u| u.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Validation(format!("json: {err}"))
    }
}
