//! Native-gas pre-flight checks for contract-driving flows.
//!
//! CCTP approvals and burns revert unhelpfully when the source wallet cannot
//! cover gas, so the gateway checks a network-specific minimum first. Arc
//! testnet is exempt: gas there is paid in USDC.

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::network::Network;

/// Minimum native balance (in the chain's native token) recommended before
/// submitting a CCTP transfer. `None` means no check applies.
pub fn min_native_for_cctp(network: Network) -> Option<Decimal> {
    // Gas on Arc testnet is paid in USDC.
    if network == Network::ArcTestnet {
        return None;
    }
    let minimum = match network {
        Network::Eth | Network::EthSepolia => "0.002",
        Network::Matic | Network::MaticAmoy => "0.1",
        Network::Avax | Network::AvaxFuji => "0.01",
        Network::Sol | Network::SolDevnet => "0.005",
        // L2s settle cheaply.
        _ => "0.001",
    };
    Some(Decimal::from_str(minimum).expect("static decimal"))
}

/// Verify a wallet's native balance against the network minimum.
/// Returns `Err(message)` with a funding hint when insufficient.
pub fn check_gas_requirements(
    network: Network,
    native_balance: Decimal,
    operation: &str,
) -> Result<(), String> {
    let Some(minimum) = min_native_for_cctp(network) else {
        return Ok(());
    };
    if native_balance >= minimum {
        return Ok(());
    }
    Err(format!(
        "Insufficient native gas for {operation} on {network}: balance {native_balance}, \
         recommended minimum {minimum}. Fund the wallet with native tokens and retry."
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arc_testnet_is_exempt() {
        assert_eq!(min_native_for_cctp(Network::ArcTestnet), None);
        assert!(check_gas_requirements(Network::ArcTestnet, Decimal::ZERO, "CCTP").is_ok());
    }

    #[test]
    fn insufficient_gas_yields_funding_hint() {
        let err =
            check_gas_requirements(Network::EthSepolia, Decimal::ZERO, "CCTP transfer").unwrap_err();
        assert!(err.contains("ETH-SEPOLIA"));
        assert!(err.contains("Fund the wallet"));
    }

    #[test]
    fn sufficient_gas_passes() {
        let balance = Decimal::from_str("0.5").unwrap();
        assert!(check_gas_requirements(Network::Base, balance, "CCTP").is_ok());
    }
}
