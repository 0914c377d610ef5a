//! Configuration for the payment orchestrator.
//!
//! Values load from constructor arguments with environment-variable
//! fallbacks. The provider API key and entity secret are required; the entity
//! secret is opaque and never exposed past the wallet provider client.

use std::env;
use std::str::FromStr;
use url::Url;

use crate::error::{Error, Result};
use crate::network::Network;

const ENV_API_KEY: &str = "CIRCLE_API_KEY";
const ENV_ENTITY_SECRET: &str = "ENTITY_SECRET";
const ENV_NETWORK: &str = "AGENTPAY_NETWORK";
const ENV_RPC_URLS: &str = "AGENTPAY_RPC_URL";
const ENV_STORAGE_BACKEND: &str = "AGENTPAY_STORAGE_BACKEND";
const ENV_REDIS_URL: &str = "AGENTPAY_REDIS_URL";
const ENV_LOG_LEVEL: &str = "AGENTPAY_LOG_LEVEL";
const ENV_DEFAULT_WALLET: &str = "AGENTPAY_DEFAULT_WALLET";
const ENV_TRUST_POLICY: &str = "AGENTPAY_TRUST_POLICY";

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    /// In-process backend; test-grade, lost on exit.
    #[default]
    Memory,
    /// Redis-backed (requires the `redis` feature).
    Redis,
}

impl FromStr for StorageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "redis" => Ok(StorageKind::Redis),
            other => Err(Error::Configuration(format!(
                "unknown storage backend: {other}"
            ))),
        }
    }
}

/// Trust policy preset named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrustPreset {
    #[default]
    Permissive,
    Standard,
    Strict,
}

impl FromStr for TrustPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "permissive" => Ok(TrustPreset::Permissive),
            "standard" => Ok(TrustPreset::Standard),
            "strict" => Ok(TrustPreset::Strict),
            other => Err(Error::Configuration(format!(
                "unknown trust policy preset: {other}"
            ))),
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Wallet provider API key (required).
    pub api_key: String,
    /// Opaque entity secret accompanying provider write calls (required).
    pub entity_secret: String,
    /// Default source network.
    pub network: Network,
    /// Wallet provider REST base URL.
    pub provider_base_url: Url,
    /// Comma-separated JSON-RPC endpoints for on-chain trust reads, in
    /// strict fallback order. Empty disables the trust gate.
    pub rpc_urls: Vec<Url>,
    /// Storage backend selection.
    pub storage_backend: StorageKind,
    /// Redis connection URL when `storage_backend` is Redis.
    pub redis_url: Option<String>,
    /// Log level for the optional tracing bootstrap.
    pub log_level: String,
    /// HTTP client timeout in seconds.
    pub http_timeout: f64,
    /// Overall CCTP transfer timeout budget in seconds.
    pub cctp_timeout: f64,
    /// Interval between provider transaction polls, in seconds.
    pub transaction_poll_interval: f64,
    /// Budget for waiting on a provider transaction, in seconds.
    pub transaction_poll_timeout: f64,
    /// Wallet used when callers omit one.
    pub default_wallet_id: Option<String>,
    /// x402 facilitator endpoint.
    pub x402_facilitator_url: Url,
    /// Override for the CCTP attestation API base (testing hook; the
    /// sandbox/production host is otherwise derived from the network).
    pub attestation_api_url: Option<Url>,
    /// Trust policy preset applied as the gate default.
    pub trust_default_policy: TrustPreset,
}

impl Config {
    /// Build a configuration from explicit credentials plus environment
    /// fallbacks for everything else.
    pub fn new(
        api_key: impl Into<String>,
        entity_secret: impl Into<String>,
        network: Network,
    ) -> Result<Self> {
        let api_key = api_key.into();
        let entity_secret = entity_secret.into();
        if api_key.is_empty() {
            return Err(Error::Configuration("api_key is required".into()));
        }
        if entity_secret.is_empty() {
            return Err(Error::Configuration("entity_secret is required".into()));
        }
        Ok(Config {
            api_key,
            entity_secret,
            network,
            provider_base_url: Url::parse("https://api.circle.com/v1/w3s/")
                .expect("static provider url"),
            rpc_urls: parse_rpc_urls(env::var(ENV_RPC_URLS).ok().as_deref())?,
            storage_backend: env_parse(ENV_STORAGE_BACKEND)?.unwrap_or_default(),
            redis_url: env::var(ENV_REDIS_URL).ok(),
            log_level: env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| "info".to_string()),
            http_timeout: 30.0,
            cctp_timeout: 300.0,
            transaction_poll_interval: 2.0,
            transaction_poll_timeout: 120.0,
            default_wallet_id: env::var(ENV_DEFAULT_WALLET).ok(),
            x402_facilitator_url: Url::parse("https://x402.org/facilitator")
                .expect("static facilitator url"),
            attestation_api_url: None,
            trust_default_policy: env_parse(ENV_TRUST_POLICY)?.unwrap_or_default(),
        })
    }

    /// Load the full configuration from environment variables.
    ///
    /// `CIRCLE_API_KEY` and `ENTITY_SECRET` are required; `AGENTPAY_NETWORK`
    /// defaults to `ARC-TESTNET`.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var(ENV_API_KEY)
            .map_err(|_| Error::Configuration(format!("{ENV_API_KEY} is not set")))?;
        let entity_secret = env::var(ENV_ENTITY_SECRET)
            .map_err(|_| Error::Configuration(format!("{ENV_ENTITY_SECRET} is not set")))?;
        let network = match env::var(ENV_NETWORK) {
            Ok(raw) => raw
                .parse::<Network>()
                .map_err(|e| Error::Configuration(e.to_string()))?,
            Err(_) => Network::ArcTestnet,
        };
        Config::new(api_key, entity_secret, network)
    }

    /// API key with most characters masked for log output.
    pub fn masked_api_key(&self) -> String {
        if self.api_key.len() <= 8 {
            "****".to_string()
        } else {
            format!(
                "{}...{}",
                &self.api_key[..4],
                &self.api_key[self.api_key.len() - 4..]
            )
        }
    }
}

fn parse_rpc_urls(raw: Option<&str>) -> Result<Vec<Url>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Url::parse(s).map_err(|e| Error::Configuration(format!("bad RPC url {s}: {e}"))))
        .collect()
}

fn env_parse<T: FromStr<Err = Error>>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw.parse().map(Some),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_credentials() {
        assert!(Config::new("", "secret", Network::EthSepolia).is_err());
        assert!(Config::new("key", "", Network::EthSepolia).is_err());
        let config = Config::new("key-123456789", "secret", Network::EthSepolia).unwrap();
        assert_eq!(config.network, Network::EthSepolia);
        assert_eq!(config.storage_backend, StorageKind::Memory);
    }

    #[test]
    fn masks_api_key() {
        let config = Config::new("TEST_API_KEY:abcdef:123456", "secret", Network::Base).unwrap();
        let masked = config.masked_api_key();
        assert!(masked.starts_with("TEST"));
        assert!(masked.contains("..."));
        assert!(!masked.contains("abcdef"));

        let short = Config::new("short", "secret", Network::Base).unwrap();
        assert_eq!(short.masked_api_key(), "****");
    }

    #[test]
    fn parses_comma_separated_rpc_urls() {
        let urls =
            parse_rpc_urls(Some("https://rpc-a.example.com, https://rpc-b.example.com")).unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].host_str(), Some("rpc-a.example.com"));

        assert!(parse_rpc_urls(Some("not a url")).is_err());
        assert!(parse_rpc_urls(None).unwrap().is_empty());
    }

    #[test]
    fn storage_and_trust_presets_parse() {
        assert_eq!("memory".parse::<StorageKind>().unwrap(), StorageKind::Memory);
        assert_eq!("REDIS".parse::<StorageKind>().unwrap(), StorageKind::Redis);
        assert!("etcd".parse::<StorageKind>().is_err());

        assert_eq!("standard".parse::<TrustPreset>().unwrap(), TrustPreset::Standard);
        assert!("paranoid".parse::<TrustPreset>().is_err());
    }
}
