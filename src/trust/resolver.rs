//! Identity resolution: on-chain registry reads plus the off-chain agent
//! registration file.
//!
//! Registration files are fetched from `https://` URLs directly, `ipfs://`
//! URIs through a small gateway list with fallback, and
//! `data:application/json;base64,` URIs inline.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::provider::RegistryProvider;
use super::registry::is_registry_supported;
use super::types::AgentIdentity;
use crate::network::Network;
use crate::util::Base64Bytes;

const METADATA_FETCH_TIMEOUT_SECS: f64 = 10.0;

const IPFS_GATEWAYS: &[&str] = &[
    "https://ipfs.io/ipfs/",
    "https://cloudflare-ipfs.com/ipfs/",
    "https://gateway.pinata.cloud/ipfs/",
];

pub struct IdentityResolver {
    provider: Arc<RegistryProvider>,
    http: reqwest::Client,
}

impl IdentityResolver {
    pub fn new(provider: Arc<RegistryProvider>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(METADATA_FETCH_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        IdentityResolver { provider, http }
    }

    /// Resolve an agent by registry token id.
    ///
    /// Reads `ownerOf`, `tokenURI`, `getAgentWallet`, then fetches and
    /// merges the registration file. Returns `None` when the agent does not
    /// exist (or the network has no registry).
    pub async fn resolve_by_id(
        &self,
        agent_id: u64,
        network: Network,
    ) -> crate::error::Result<Option<AgentIdentity>> {
        if !is_registry_supported(network) {
            tracing::debug!(%network, "trust registry not deployed");
            return Ok(None);
        }

        let Some(owner) = self.provider.agent_owner(agent_id, network).await? else {
            tracing::debug!(agent_id, %network, "agent not found in identity registry");
            return Ok(None);
        };
        let agent_uri = self.provider.agent_uri(agent_id, network).await?;
        let agent_wallet = self.provider.agent_wallet(agent_id, network).await?;

        let mut identity = AgentIdentity::on_chain(agent_id, owner, agent_wallet);
        if let Some(uri) = agent_uri {
            if let Some(registration) = self.fetch_metadata(&uri).await {
                identity.apply_registration_file(&registration);
            }
        }
        Ok(Some(identity))
    }

    /// Resolve the first agent NFT owned by `address` via
    /// `balanceOf` + `tokenOfOwnerByIndex`.
    pub async fn resolve_by_address(
        &self,
        address: &str,
        network: Network,
    ) -> crate::error::Result<Option<AgentIdentity>> {
        if !is_registry_supported(network) {
            return Ok(None);
        }
        let balance = self.provider.identity_balance(address, network).await?;
        if balance == 0 {
            return Ok(None);
        }
        let Some(token_id) = self.provider.token_of_owner(address, 0, network).await? else {
            return Ok(None);
        };
        self.resolve_by_id(token_id, network).await
    }

    /// Fetch a registration file from any supported URI scheme.
    /// Fetch failures are logged and yield `None`; the on-chain identity
    /// still stands without its metadata.
    pub async fn fetch_metadata(&self, agent_uri: &str) -> Option<Value> {
        if agent_uri.starts_with("data:") {
            return Self::parse_data_uri(agent_uri);
        }
        if let Some(cid) = agent_uri.strip_prefix("ipfs://") {
            return self.fetch_ipfs(cid).await;
        }
        if agent_uri.starts_with("http://") || agent_uri.starts_with("https://") {
            return self.fetch_https(agent_uri).await;
        }
        tracing::warn!(uri = %truncate(agent_uri, 50), "unsupported agentURI scheme");
        None
    }

    fn parse_data_uri(uri: &str) -> Option<Value> {
        // data:application/json;base64,eyJ0eXBlIjoi...
        let (_, encoded) = uri.split_once(',')?;
        let decoded = Base64Bytes::from(encoded).decode().ok()?;
        serde_json::from_slice(&decoded).ok()
    }

    async fn fetch_ipfs(&self, cid: &str) -> Option<Value> {
        for gateway in IPFS_GATEWAYS {
            if let Some(value) = self.fetch_https(&format!("{gateway}{cid}")).await {
                return Some(value);
            }
        }
        tracing::warn!(cid = %truncate(cid, 40), "all IPFS gateways failed");
        None
    }

    async fn fetch_https(&self, url: &str) -> Option<Value> {
        match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => response.json().await.ok(),
            Ok(response) => {
                tracing::debug!(%url, status = %response.status(), "metadata fetch rejected");
                None
            }
            Err(e) => {
                tracing::debug!(%url, "metadata fetch failed: {e}");
                None
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    &s[..s.len().min(max)]
}
