//! CCTP V2 constants: domain IDs, contract addresses, transfer parameters,
//! and the attestation API.
//!
//! Contract addresses are the published V2 deployments; the same
//! TokenMessenger/MessageTransmitter address is shared by every EVM chain in
//! each environment.

use url::Url;

use crate::network::Network;

/// TokenMessengerV2 deployments.
pub const TOKEN_MESSENGER_V2_MAINNET: &str = "0x28b5a0e9C621a5BadaA536219b3a228C8168cf5d";
pub const TOKEN_MESSENGER_V2_TESTNET: &str = "0x8FE6B999Dc680CcFDD5Bf7EB0974218be2542DAA";

/// MessageTransmitterV2 deployments.
pub const MESSAGE_TRANSMITTER_V2_MAINNET: &str = "0x81D40F21F12A8F0E3252Bccb954D722d4c464B64";
pub const MESSAGE_TRANSMITTER_V2_TESTNET: &str = "0xE737e5cEBEEBa77EFE34D4aa090756590b1CE275";

/// Attestation service hosts.
pub const ATTESTATION_API_SANDBOX: &str = "https://iris-api-sandbox.circle.com";
pub const ATTESTATION_API_PRODUCTION: &str = "https://iris-api.circle.com";

/// Fast Transfer finality threshold (`minFinalityThreshold <= 1000`).
pub const FAST_TRANSFER_THRESHOLD: u32 = 1000;
/// Standard Transfer finality threshold (`minFinalityThreshold >= 2000`).
pub const STANDARD_TRANSFER_THRESHOLD: u32 = 2000;

/// Default `maxFee` in USDC smallest units (0.0005 USDC).
pub const DEFAULT_MAX_FEE: u64 = 500;

/// `destinationCaller` left open: anyone may submit the mint.
pub const EMPTY_DESTINATION_CALLER: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000000";

/// CCTP domain ID for a network, if the network participates in CCTP.
pub fn cctp_domain(network: Network) -> Option<u32> {
    match network {
        Network::Eth | Network::EthSepolia => Some(0),
        Network::Avax | Network::AvaxFuji => Some(1),
        Network::Op | Network::OpSepolia => Some(2),
        Network::Arb | Network::ArbSepolia => Some(3),
        Network::Sol | Network::SolDevnet => Some(5),
        Network::Base | Network::BaseSepolia => Some(6),
        Network::Matic | Network::MaticAmoy => Some(7),
        Network::ArcTestnet => Some(26),
        _ => None,
    }
}

/// Whether a network participates in CCTP.
pub fn is_cctp_supported(network: Network) -> bool {
    cctp_domain(network).is_some()
}

/// TokenMessengerV2 contract for a network.
pub fn token_messenger_v2(network: Network) -> Option<&'static str> {
    if !is_cctp_supported(network) || network.is_solana() {
        return None;
    }
    Some(if network.is_testnet() {
        TOKEN_MESSENGER_V2_TESTNET
    } else {
        TOKEN_MESSENGER_V2_MAINNET
    })
}

/// MessageTransmitterV2 contract for a network.
pub fn message_transmitter_v2(network: Network) -> Option<&'static str> {
    if !is_cctp_supported(network) || network.is_solana() {
        return None;
    }
    Some(if network.is_testnet() {
        MESSAGE_TRANSMITTER_V2_TESTNET
    } else {
        MESSAGE_TRANSMITTER_V2_MAINNET
    })
}

/// USDC token contract for a network.
pub fn usdc_contract(network: Network) -> Option<&'static str> {
    match network {
        Network::Eth => Some("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
        Network::EthSepolia => Some("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238"),
        Network::Avax => Some("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"),
        Network::AvaxFuji => Some("0x5425890298aed601595a70AB815c96711a31Bc65"),
        Network::Op => Some("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"),
        Network::OpSepolia => Some("0x5fd84259d66Cd46123540766Be93DFE6D43130D7"),
        Network::Arb => Some("0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
        Network::ArbSepolia => Some("0x75faf114eafb1BDbe2F0316DF893fd58CE46AA4d"),
        Network::Base => Some("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
        Network::BaseSepolia => Some("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
        Network::Matic => Some("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
        Network::MaticAmoy => Some("0x41e94eb019c0762f9bfcf9fb1e58725bfb0e7582"),
        Network::ArcTestnet => Some("0x79A02482A880bCE3F13e09Da970dC34db4CD24d1"),
        _ => None,
    }
}

/// Attestation API base for a network: sandbox on testnets, production
/// otherwise. `override_base` (from configuration) wins when set.
pub fn attestation_base(network: Network, override_base: Option<&Url>) -> String {
    if let Some(base) = override_base {
        return base.as_str().trim_end_matches('/').to_string();
    }
    if network.is_testnet() {
        ATTESTATION_API_SANDBOX.to_string()
    } else {
        ATTESTATION_API_PRODUCTION.to_string()
    }
}

/// Full attestation polling URL for a burn on `source_domain`.
pub fn attestation_url(
    network: Network,
    source_domain: u32,
    tx_hash: &str,
    override_base: Option<&Url>,
) -> String {
    format!(
        "{}/v2/messages/{source_domain}?transactionHash={tx_hash}",
        attestation_base(network, override_base)
    )
}

/// Zero-pad an EVM address into a bytes32 hex string for `mintRecipient`.
pub fn address_to_bytes32(address: &str) -> String {
    let stripped = address.trim_start_matches("0x").to_lowercase();
    format!("0x{stripped:0>64}")
}
