//! Network definitions for custodial wallets and CCTP routing.
//!
//! This module defines the closed set of blockchain networks the orchestrator
//! can operate on, using the wallet provider's canonical identifiers
//! (e.g. `ETH-SEPOLIA`, `BASE`, `SOL-DEVNET`).

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Supported blockchain networks.
///
/// Identifiers follow the wallet provider's naming scheme. Parsing via
/// [`Network::from_str`] is lenient about case and `_` vs `-` separators so
/// that values coming from x402 payment requirements (`base-sepolia`) and
/// environment variables (`BASE_SEPOLIA`) resolve to the same variant.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Ethereum mainnet.
    #[serde(rename = "ETH")]
    Eth,
    /// Ethereum Sepolia testnet.
    #[serde(rename = "ETH-SEPOLIA")]
    EthSepolia,
    /// Avalanche C-Chain mainnet.
    #[serde(rename = "AVAX")]
    Avax,
    /// Avalanche Fuji testnet.
    #[serde(rename = "AVAX-FUJI")]
    AvaxFuji,
    /// Polygon PoS mainnet.
    #[serde(rename = "MATIC")]
    Matic,
    /// Polygon Amoy testnet.
    #[serde(rename = "MATIC-AMOY")]
    MaticAmoy,
    /// Solana mainnet-beta.
    #[serde(rename = "SOL")]
    Sol,
    /// Solana devnet.
    #[serde(rename = "SOL-DEVNET")]
    SolDevnet,
    /// Arbitrum One mainnet.
    #[serde(rename = "ARB")]
    Arb,
    /// Arbitrum Sepolia testnet.
    #[serde(rename = "ARB-SEPOLIA")]
    ArbSepolia,
    /// Base mainnet.
    #[serde(rename = "BASE")]
    Base,
    /// Base Sepolia testnet.
    #[serde(rename = "BASE-SEPOLIA")]
    BaseSepolia,
    /// Optimism mainnet.
    #[serde(rename = "OP")]
    Op,
    /// Optimism Sepolia testnet.
    #[serde(rename = "OP-SEPOLIA")]
    OpSepolia,
    /// Unichain mainnet.
    #[serde(rename = "UNI")]
    Uni,
    /// Unichain Sepolia testnet.
    #[serde(rename = "UNI-SEPOLIA")]
    UniSepolia,
    /// Near mainnet.
    #[serde(rename = "NEAR")]
    Near,
    /// Near testnet.
    #[serde(rename = "NEAR-TESTNET")]
    NearTestnet,
    /// Aptos mainnet.
    #[serde(rename = "APTOS")]
    Aptos,
    /// Aptos testnet.
    #[serde(rename = "APTOS-TESTNET")]
    AptosTestnet,
    /// Arc testnet (gas is paid in USDC).
    #[serde(rename = "ARC-TESTNET")]
    ArcTestnet,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a string does not name a known [`Network`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown network: {0}")]
pub struct UnknownNetwork(pub String);

impl Network {
    /// Canonical provider-facing identifier, e.g. `"ETH-SEPOLIA"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Eth => "ETH",
            Network::EthSepolia => "ETH-SEPOLIA",
            Network::Avax => "AVAX",
            Network::AvaxFuji => "AVAX-FUJI",
            Network::Matic => "MATIC",
            Network::MaticAmoy => "MATIC-AMOY",
            Network::Sol => "SOL",
            Network::SolDevnet => "SOL-DEVNET",
            Network::Arb => "ARB",
            Network::ArbSepolia => "ARB-SEPOLIA",
            Network::Base => "BASE",
            Network::BaseSepolia => "BASE-SEPOLIA",
            Network::Op => "OP",
            Network::OpSepolia => "OP-SEPOLIA",
            Network::Uni => "UNI",
            Network::UniSepolia => "UNI-SEPOLIA",
            Network::Near => "NEAR",
            Network::NearTestnet => "NEAR-TESTNET",
            Network::Aptos => "APTOS",
            Network::AptosTestnet => "APTOS-TESTNET",
            Network::ArcTestnet => "ARC-TESTNET",
        }
    }

    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[
            Network::Eth,
            Network::EthSepolia,
            Network::Avax,
            Network::AvaxFuji,
            Network::Matic,
            Network::MaticAmoy,
            Network::Sol,
            Network::SolDevnet,
            Network::Arb,
            Network::ArbSepolia,
            Network::Base,
            Network::BaseSepolia,
            Network::Op,
            Network::OpSepolia,
            Network::Uni,
            Network::UniSepolia,
            Network::Near,
            Network::NearTestnet,
            Network::Aptos,
            Network::AptosTestnet,
            Network::ArcTestnet,
        ]
    }

    /// True for test networks (Sepolia, Fuji, Amoy, devnets, Arc testnet).
    pub fn is_testnet(&self) -> bool {
        let s = self.as_str();
        s.ends_with("-SEPOLIA")
            || s.ends_with("-TESTNET")
            || s.ends_with("-FUJI")
            || s.ends_with("-DEVNET")
            || s.ends_with("-AMOY")
    }

    /// True for EVM-compatible networks.
    pub fn is_evm(&self) -> bool {
        !matches!(
            self,
            Network::Sol
                | Network::SolDevnet
                | Network::Near
                | Network::NearTestnet
                | Network::Aptos
                | Network::AptosTestnet
        )
    }

    /// True for Solana networks.
    pub fn is_solana(&self) -> bool {
        matches!(self, Network::Sol | Network::SolDevnet)
    }
}

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('_', "-");
        Network::variants()
            .iter()
            .find(|n| n.as_str() == normalized)
            .copied()
            .ok_or_else(|| UnknownNetwork(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_and_lenient_forms() {
        assert_eq!("ETH-SEPOLIA".parse::<Network>().unwrap(), Network::EthSepolia);
        assert_eq!("eth_sepolia".parse::<Network>().unwrap(), Network::EthSepolia);
        assert_eq!("base-sepolia".parse::<Network>().unwrap(), Network::BaseSepolia);
        assert_eq!("BASE".parse::<Network>().unwrap(), Network::Base);
        assert!("NOT-A-CHAIN".parse::<Network>().is_err());
    }

    #[test]
    fn serde_uses_provider_identifiers() {
        let json = serde_json::to_string(&Network::BaseSepolia).unwrap();
        assert_eq!(json, "\"BASE-SEPOLIA\"");
        let back: Network = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Network::BaseSepolia);
    }

    #[test]
    fn testnet_and_family_classification() {
        assert!(Network::EthSepolia.is_testnet());
        assert!(Network::ArcTestnet.is_testnet());
        assert!(!Network::Base.is_testnet());

        assert!(Network::Base.is_evm());
        assert!(Network::ArcTestnet.is_evm());
        assert!(!Network::Sol.is_evm());
        assert!(Network::SolDevnet.is_solana());
        assert!(!Network::Arb.is_solana());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for network in Network::variants() {
            let parsed: Network = network.to_string().parse().unwrap();
            assert_eq!(parsed, *network);
        }
    }
}
