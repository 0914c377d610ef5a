//! Read-only on-chain access to the trust registries.
//!
//! Speaks raw JSON-RPC `eth_call` with pre-computed 4-byte selectors and
//! hand-rolled ABI coding; the whole surface is view functions over simple
//! types, so a full contract stack buys nothing here. Endpoints are tried in
//! strict order with fallback on timeout, HTTP error, or RPC error, and an
//! optional circuit breaker guards the pool as a whole.

use serde_json::{Value, json};
use std::time::Duration;
use url::Url;

use super::registry::{identity_registry, reputation_registry};
use super::types::FeedbackSignal;
use crate::error::{Error, Result};
use crate::network::Network;
use crate::resilience::CircuitBreaker;

// Selectors: keccak256(signature)[..4], hex.
// Identity registry (ERC-721 base)
const SEL_OWNER_OF: &str = "6352211e"; // ownerOf(uint256)
const SEL_TOKEN_URI: &str = "c87b56dd"; // tokenURI(uint256)
const SEL_BALANCE_OF: &str = "70a08231"; // balanceOf(address)
const SEL_TOKEN_OF_OWNER_BY_INDEX: &str = "2f745c59"; // tokenOfOwnerByIndex(address,uint256)
// Identity registry (agent extensions)
const SEL_GET_AGENT_WALLET: &str = "00339509"; // getAgentWallet(uint256)
// Reputation registry
const SEL_GET_CLIENTS: &str = "42dd519c"; // getClients(uint256)
const SEL_GET_LAST_INDEX: &str = "f2d81759"; // getLastIndex(uint256,address)
const SEL_READ_FEEDBACK: &str = "232b0810"; // readFeedback(uint256,address,uint64)
// Validation registry (no deployment yet; reserved)
#[allow(dead_code)]
const SEL_GET_VALIDATION_STATUS: &str = "ff2febfc"; // getValidationStatus(bytes32)
#[allow(dead_code)]
const SEL_GET_AGENT_VALIDATIONS: &str = "8d5d0c2d"; // getAgentValidations(uint256)

/// Cap on feedback entries pulled for one agent.
const MAX_FEEDBACK_SIGNALS: usize = 200;
/// Cap on decoded array lengths, against hostile responses.
const MAX_ARRAY_ITEMS: usize = 1000;

/// JSON-RPC reader over the trust registries.
pub struct RegistryProvider {
    rpc_urls: Vec<Url>,
    http: reqwest::Client,
    breaker: Option<CircuitBreaker>,
}

impl RegistryProvider {
    pub fn new(rpc_urls: Vec<Url>, timeout_secs: f64, breaker: Option<CircuitBreaker>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(timeout_secs))
            .build()
            .unwrap_or_default();
        RegistryProvider {
            rpc_urls,
            http,
            breaker,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.rpc_urls.is_empty()
    }

    // ---- ABI helpers -----------------------------------------------------

    pub(crate) fn encode_uint256(value: u64) -> String {
        format!("{value:064x}")
    }

    pub(crate) fn encode_address(address: &str) -> String {
        let stripped = address.trim_start_matches("0x").to_lowercase();
        format!("{stripped:0>64}")
    }

    pub(crate) fn decode_address(word: &str) -> Option<String> {
        if word.len() < 64 {
            return None;
        }
        Some(format!("0x{}", &word[24..64]))
    }

    pub(crate) fn decode_uint(word: &str) -> Option<u64> {
        if word.len() < 64 {
            return None;
        }
        // Large values saturate: registries index with small integers.
        u64::from_str_radix(word[..64].trim_start_matches('0'), 16)
            .ok()
            .or_else(|| {
                if word[..64].chars().all(|c| c == '0') {
                    Some(0)
                } else {
                    None
                }
            })
    }

    /// Decode a dynamic string whose offset word sits at `offset` (in hex
    /// chars) within the return data.
    pub(crate) fn decode_string(data: &str, offset: usize) -> String {
        let Some(pointer_word) = data.get(offset..offset + 64) else {
            return String::new();
        };
        let Some(pointer) = Self::decode_uint(pointer_word) else {
            return String::new();
        };
        let string_offset = pointer as usize * 2;
        let Some(length_word) = data.get(string_offset..string_offset + 64) else {
            return String::new();
        };
        let Some(length) = Self::decode_uint(length_word) else {
            return String::new();
        };
        let start = string_offset + 64;
        let Some(string_hex) = data.get(start..start + length as usize * 2) else {
            return String::new();
        };
        hex::decode(string_hex)
            .ok()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }

    // ---- JSON-RPC with multi-provider fallback ---------------------------

    /// `eth_call` at `latest`, trying each endpoint in order. Returns the
    /// hex result without the `0x` prefix, or `None` for empty results.
    pub async fn eth_call(&self, to: &str, data: &str) -> Result<Option<String>> {
        if self.rpc_urls.is_empty() {
            return Ok(None);
        }
        if let Some(breaker) = &self.breaker {
            breaker.guard_entry().await?;
        }

        let payload = json!({
            "jsonrpc": "2.0",
            "method": "eth_call",
            "params": [{"to": to, "data": data}, "latest"],
            "id": 1,
        });

        let mut last_error: Option<Error> = None;
        for (i, rpc_url) in self.rpc_urls.iter().enumerate() {
            let outcome = async {
                let response = self
                    .http
                    .post(rpc_url.clone())
                    .json(&payload)
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(Error::Network {
                        message: format!("RPC HTTP {status}"),
                        status: Some(status.as_u16()),
                        url: Some(rpc_url.to_string()),
                    });
                }
                let body: Value = response.json().await?;
                if let Some(rpc_error) = body.get("error") {
                    return Err(Error::network(format!("RPC error: {rpc_error}")));
                }
                Ok(body
                    .get("result")
                    .and_then(Value::as_str)
                    .map(str::to_owned))
            }
            .await;

            match outcome {
                Ok(raw) => {
                    if let Some(breaker) = &self.breaker {
                        breaker.record_success().await;
                    }
                    return Ok(match raw.as_deref() {
                        None | Some("0x") | Some("0x0") => None,
                        Some(hex) => Some(hex.trim_start_matches("0x").to_string()),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        provider = i + 1,
                        total = self.rpc_urls.len(),
                        %rpc_url,
                        "RPC call failed, {}: {e}",
                        if i + 1 < self.rpc_urls.len() {
                            "falling back"
                        } else {
                            "no more providers"
                        }
                    );
                    last_error = Some(e);
                }
            }
        }

        if let Some(breaker) = &self.breaker {
            breaker.record_failure().await;
        }
        Err(last_error.unwrap_or_else(|| Error::network("all RPC providers failed")))
    }

    // ---- identity registry reads -----------------------------------------

    /// `ownerOf(agentId)` — owner address, or `None` when unregistered.
    pub async fn agent_owner(&self, agent_id: u64, network: Network) -> Result<Option<String>> {
        let Some(registry) = identity_registry(network) else {
            return Ok(None);
        };
        let data = format!("0x{SEL_OWNER_OF}{}", Self::encode_uint256(agent_id));
        Ok(self
            .eth_call(registry, &data)
            .await?
            .as_deref()
            .and_then(Self::decode_address))
    }

    /// `tokenURI(agentId)` — the agent registration file URI.
    pub async fn agent_uri(&self, agent_id: u64, network: Network) -> Result<Option<String>> {
        let Some(registry) = identity_registry(network) else {
            return Ok(None);
        };
        let data = format!("0x{SEL_TOKEN_URI}{}", Self::encode_uint256(agent_id));
        Ok(self
            .eth_call(registry, &data)
            .await?
            .map(|raw| Self::decode_string(&raw, 0))
            .filter(|s| !s.is_empty()))
    }

    /// `getAgentWallet(agentId)` — declared payment address.
    pub async fn agent_wallet(&self, agent_id: u64, network: Network) -> Result<Option<String>> {
        let Some(registry) = identity_registry(network) else {
            return Ok(None);
        };
        let data = format!("0x{SEL_GET_AGENT_WALLET}{}", Self::encode_uint256(agent_id));
        Ok(self
            .eth_call(registry, &data)
            .await?
            .as_deref()
            .and_then(Self::decode_address)
            .filter(|a| a != "0x0000000000000000000000000000000000000000"))
    }

    /// `balanceOf(address)` on the identity registry.
    pub async fn identity_balance(&self, address: &str, network: Network) -> Result<u64> {
        let Some(registry) = identity_registry(network) else {
            return Ok(0);
        };
        let data = format!("0x{SEL_BALANCE_OF}{}", Self::encode_address(address));
        Ok(self
            .eth_call(registry, &data)
            .await?
            .as_deref()
            .and_then(Self::decode_uint)
            .unwrap_or(0))
    }

    /// `tokenOfOwnerByIndex(address, index)`.
    pub async fn token_of_owner(
        &self,
        address: &str,
        index: u64,
        network: Network,
    ) -> Result<Option<u64>> {
        let Some(registry) = identity_registry(network) else {
            return Ok(None);
        };
        let data = format!(
            "0x{SEL_TOKEN_OF_OWNER_BY_INDEX}{}{}",
            Self::encode_address(address),
            Self::encode_uint256(index)
        );
        Ok(self
            .eth_call(registry, &data)
            .await?
            .as_deref()
            .and_then(Self::decode_uint))
    }

    // ---- reputation registry reads ---------------------------------------

    /// `getClients(agentId)` — addresses that left feedback.
    pub async fn feedback_clients(&self, agent_id: u64, network: Network) -> Result<Vec<String>> {
        let Some(registry) = reputation_registry(network) else {
            return Ok(Vec::new());
        };
        let data = format!("0x{SEL_GET_CLIENTS}{}", Self::encode_uint256(agent_id));
        let Some(raw) = self.eth_call(registry, &data).await? else {
            return Ok(Vec::new());
        };
        if raw.len() < 128 {
            return Ok(Vec::new());
        }

        // Dynamic array: offset word, length word, then elements.
        let Some(offset) = Self::decode_uint(&raw[..64]).map(|o| o as usize * 2) else {
            return Ok(Vec::new());
        };
        let Some(count) = raw
            .get(offset..offset + 64)
            .and_then(Self::decode_uint)
            .map(|c| c as usize)
        else {
            return Ok(Vec::new());
        };
        let mut clients = Vec::new();
        let mut position = offset + 64;
        for _ in 0..count.min(MAX_ARRAY_ITEMS) {
            let Some(word) = raw.get(position..position + 64) else {
                break;
            };
            if let Some(address) = Self::decode_address(word) {
                clients.push(address);
            }
            position += 64;
        }
        Ok(clients)
    }

    /// `getLastIndex(agentId, client)` — highest feedback index.
    pub async fn last_feedback_index(
        &self,
        agent_id: u64,
        client: &str,
        network: Network,
    ) -> Result<u64> {
        let Some(registry) = reputation_registry(network) else {
            return Ok(0);
        };
        let data = format!(
            "0x{SEL_GET_LAST_INDEX}{}{}",
            Self::encode_uint256(agent_id),
            Self::encode_address(client)
        );
        Ok(self
            .eth_call(registry, &data)
            .await?
            .as_deref()
            .and_then(Self::decode_uint)
            .unwrap_or(0))
    }

    /// `readFeedback(agentId, client, index)` —
    /// `(int128 value, uint8 decimals, string tag1, string tag2, bool revoked)`.
    pub async fn read_feedback(
        &self,
        agent_id: u64,
        client: &str,
        index: u64,
        network: Network,
    ) -> Result<Option<FeedbackSignal>> {
        let Some(registry) = reputation_registry(network) else {
            return Ok(None);
        };
        let data = format!(
            "0x{SEL_READ_FEEDBACK}{}{}{}",
            Self::encode_uint256(agent_id),
            Self::encode_address(client),
            Self::encode_uint256(index)
        );
        let Some(raw) = self.eth_call(registry, &data).await? else {
            return Ok(None);
        };
        if raw.len() < 320 {
            return Ok(None);
        }

        // int128 sign-extended into a 256-bit word; the low 128 bits carry
        // the value, and the wrapping cast reinterprets two's complement.
        let Ok(raw_value) = u128::from_str_radix(&raw[32..64], 16) else {
            return Ok(None);
        };
        let value = raw_value as i128;
        let decimals = Self::decode_uint(&raw[64..128]).unwrap_or(0) as u8;
        let tag1 = Self::decode_string(&raw, 128);
        let tag2 = Self::decode_string(&raw, 192);
        let is_revoked = Self::decode_uint(&raw[256..320]).unwrap_or(0) != 0;

        Ok(Some(FeedbackSignal {
            agent_id,
            client_address: client.to_string(),
            feedback_index: index,
            value,
            value_decimals: decimals,
            tag1,
            tag2,
            is_revoked,
        }))
    }

    /// All feedback for an agent: getClients, then per client getLastIndex
    /// and readFeedback over `1..=last`.
    pub async fn all_feedback(
        &self,
        agent_id: u64,
        network: Network,
    ) -> Result<Vec<FeedbackSignal>> {
        let clients = self.feedback_clients(agent_id, network).await?;
        let mut signals = Vec::new();
        'clients: for client in clients {
            let last = self.last_feedback_index(agent_id, &client, network).await?;
            for index in 1..=last {
                if signals.len() >= MAX_FEEDBACK_SIGNALS {
                    break 'clients;
                }
                if let Some(signal) = self
                    .read_feedback(agent_id, &client, index, network)
                    .await?
                {
                    signals.push(signal);
                }
            }
        }
        Ok(signals)
    }
}
