//! Agent payment orchestration in Rust: route, guard, and settle USDC
//! payments over direct transfers, HTTP 402 paywalled resources, and CCTP
//! cross-chain flows.
//!
//! # Overview
//!
//! Autonomous agents execute payments through a custodial wallet provider
//! under operator-defined policy controls. A single
//! [`AgentPay::pay`](client::AgentPay::pay) call resolves the right
//! transport for the recipient, evaluates spending and trust guards with
//! atomic reservations, executes against the provider, persists an
//! auditable ledger entry, and returns a structured result.
//!
//! # Modules
//!
//! - [`client`] — the [`AgentPay`](client::AgentPay) facade.
//! - [`router`] — priority-ordered adapter dispatch.
//! - [`protocols`] — transfer, x402, and CCTP gateway adapters.
//! - [`guards`] — budget, rate-limit, single-tx, recipient, and confirm
//!   guards with two-phase reservation semantics.
//! - [`intents`] — authorize-then-capture payment intents with fund
//!   reservation.
//! - [`trust`] — on-chain identity resolution, reputation scoring, and the
//!   policy engine.
//! - [`ledger`] — the append-and-mutate payment ledger.
//! - [`storage`] — the pluggable key-value backend everything persists
//!   through.
//! - [`cctp`] — CCTP V2 domains, contracts, and attestation endpoints.
//! - [`resilience`] — the distributed circuit breaker.
//! - [`webhooks`] — provider webhook verification and parsing.
//!
//! # Example
//!
//! ```no_run
//! use agentpay_rs::client::{AgentPay, PayOptions};
//! use agentpay_rs::config::Config;
//! use agentpay_rs::network::Network;
//! use rust_decimal::Decimal;
//!
//! # async fn run() -> agentpay_rs::error::Result<()> {
//! let config = Config::new("api-key", "entity-secret", Network::EthSepolia)?;
//! let client = AgentPay::new(config)?;
//! let result = client
//!     .pay(
//!         "wallet-id",
//!         "0x742d35cc6634c0532925a3b844bc9e7595f25e4a",
//!         Decimal::ONE,
//!         PayOptions::default(),
//!     )
//!     .await?;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod cctp;
pub mod client;
pub mod config;
pub mod error;
pub mod gas;
pub mod guards;
pub mod intents;
pub mod ledger;
pub mod network;
pub mod protocols;
pub mod provider;
pub mod resilience;
pub mod router;
pub mod storage;
pub mod telemetry;
pub mod trust;
pub mod types;
pub mod util;
pub mod wallet;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{AgentPay, IntentOptions, PayOptions};
pub use config::Config;
pub use error::{Error, Result};
pub use network::Network;
pub use types::{
    FeeLevel, PaymentIntent, PaymentIntentStatus, PaymentMethod, PaymentRequest, PaymentResult,
    PaymentStatus, SimulationResult,
};
