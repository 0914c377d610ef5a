//! Protocol adapters: the concrete ways USDC leaves a wallet.
//!
//! - [`transfer::TransferAdapter`] — direct same-chain transfer (priority 50)
//! - [`x402::X402Adapter`] — HTTP 402 paywalled resources (priority 10)
//! - [`gateway::GatewayAdapter`] — CCTP cross-chain burn/attest/mint
//!   (priority 30)

pub mod gateway;
pub mod transfer;
pub mod x402;

pub use gateway::GatewayAdapter;
pub use transfer::TransferAdapter;
pub use x402::X402Adapter;
