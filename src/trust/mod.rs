//! Trust gate: on-chain identity and reputation checks ahead of payment.
//!
//! Pipeline per evaluation: resolve the active policy (wallet override,
//! else default) -> cached identity lookup (registry reads + registration
//! file) -> reputation aggregation over feedback signals -> ordered policy
//! checks -> verdict. Registry I/O failures skip straight to the policy's
//! `unresolvable_action`.

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::network::Network;
use crate::resilience::CircuitBreaker;
use crate::storage::StorageBackend;

pub mod cache;
pub mod policy;
pub mod provider;
pub mod registry;
pub mod resolver;
pub mod scoring;
pub mod types;

pub use cache::TrustCache;
pub use policy::PolicyEngine;
pub use provider::RegistryProvider;
pub use resolver::IdentityResolver;
pub use scoring::ReputationAggregator;
pub use types::{
    AgentIdentity, AgentService, FeedbackSignal, ReputationScore, TrustCheckResult, TrustPolicy,
    TrustVerdict,
};

/// Orchestrates trust evaluation for payment recipients.
pub struct TrustGate {
    provider: Arc<RegistryProvider>,
    resolver: IdentityResolver,
    cache: TrustCache,
    policy_engine: PolicyEngine,
    scoring: ReputationAggregator,
    network: Option<Network>,
    default_policy: TrustPolicy,
    wallet_policies: DashMap<String, TrustPolicy>,
}

impl TrustGate {
    /// Build a gate over the given RPC endpoints. The `rpc` breaker, when
    /// provided, guards the whole endpoint pool.
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        rpc_urls: Vec<url::Url>,
        http_timeout_secs: f64,
        network: Option<Network>,
        default_policy: TrustPolicy,
        breaker: Option<CircuitBreaker>,
    ) -> Self {
        let provider = Arc::new(RegistryProvider::new(rpc_urls, http_timeout_secs, breaker));
        TrustGate {
            resolver: IdentityResolver::new(provider.clone()),
            cache: TrustCache::new(storage),
            policy_engine: PolicyEngine,
            scoring: ReputationAggregator::default(),
            network,
            default_policy,
            wallet_policies: DashMap::new(),
            provider,
        }
    }

    /// Whether the gate has RPC connectivity at all.
    pub fn is_configured(&self) -> bool {
        self.provider.is_configured()
    }

    /// Set a trust policy override for one wallet.
    pub fn set_policy(&self, wallet_id: &str, policy: TrustPolicy) {
        self.wallet_policies.insert(wallet_id.to_string(), policy);
    }

    /// The policy in effect for a wallet.
    pub fn policy(&self, wallet_id: Option<&str>) -> TrustPolicy {
        wallet_id
            .and_then(|id| self.wallet_policies.get(id).map(|p| p.clone()))
            .unwrap_or_else(|| self.default_policy.clone())
    }

    /// Run the full evaluation pipeline for a recipient.
    pub async fn evaluate(
        &self,
        recipient: &str,
        amount: Decimal,
        wallet_id: Option<&str>,
        network: Option<Network>,
        policy: Option<TrustPolicy>,
    ) -> TrustCheckResult {
        let started = Instant::now();
        let network = network.or(self.network);
        let policy = policy.unwrap_or_else(|| self.policy(wallet_id));
        let chain_key = network.map(|n| n.to_string()).unwrap_or_else(|| "unknown".into());

        let lookup = self
            .lookup_identity_and_reputation(recipient, &chain_key, network)
            .await;

        let (identity, reputation, cache_hit) = match lookup {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!("trust gate lookup failed: {e}");
                return TrustCheckResult {
                    identity_found: false,
                    token_id: None,
                    organization: None,
                    wts: None,
                    sample_size: 0,
                    new_agent: true,
                    flags: vec!["registry_error".into()],
                    attestations: Vec::new(),
                    policy_id: Some(policy.policy_id.clone()),
                    verdict: policy.unresolvable_action,
                    block_reason: Some(format!("REGISTRY_ERROR:{e}")),
                    check_latency_ms: started.elapsed().as_millis() as u64,
                    cache_hit: false,
                    checked_at: Some(chrono::Utc::now()),
                };
            }
        };

        let mut result = self.policy_engine.evaluate(
            identity.as_ref(),
            reputation.as_ref(),
            amount,
            recipient,
            &policy,
        );
        result.check_latency_ms = started.elapsed().as_millis() as u64;
        result.cache_hit = cache_hit;
        result.checked_at = Some(chrono::Utc::now());

        tracing::info!(
            verdict = ?result.verdict,
            %recipient,
            wts = ?result.wts,
            latency_ms = result.check_latency_ms,
            cache_hit,
            "trust gate evaluation"
        );
        result
    }

    /// Standalone trust lookup without a payment attached.
    pub async fn lookup(&self, address: &str, network: Option<Network>) -> TrustCheckResult {
        self.evaluate(
            address,
            Decimal::ZERO,
            None,
            network,
            Some(self.default_policy.clone()),
        )
        .await
    }

    async fn lookup_identity_and_reputation(
        &self,
        recipient: &str,
        chain_key: &str,
        network: Option<Network>,
    ) -> Result<(Option<AgentIdentity>, Option<ReputationScore>, bool)> {
        let Some(network) = network else {
            return Ok((None, None, false));
        };

        // Identity, through the cache.
        let (identity_value, cache_hit) = self
            .cache
            .get_or_fetch(chain_key, recipient, "identity", || async {
                let identity = self.resolver.resolve_by_address(recipient, network).await?;
                Ok(match identity {
                    Some(identity) => Some(serde_json::to_value(&identity)?),
                    None => None,
                })
            })
            .await?;
        let identity: Option<AgentIdentity> = identity_value
            .map(serde_json::from_value)
            .transpose()
            .unwrap_or(None);

        let Some(identity) = identity else {
            return Ok((None, None, cache_hit));
        };

        // Reputation signals, through the cache.
        let agent_id = identity.agent_id;
        let (signals_value, _) = self
            .cache
            .get_or_fetch(chain_key, &identity.wallet_address, "reputation", || async {
                match self.provider.all_feedback(agent_id, network).await {
                    Ok(signals) => Ok(Some(serde_json::to_value(&signals)?)),
                    Err(e) => {
                        tracing::warn!(agent_id, "failed to fetch reputation: {e}");
                        Ok(Some(Value::Array(Vec::new())))
                    }
                }
            })
            .await?;
        let signals: Vec<FeedbackSignal> = signals_value
            .map(serde_json::from_value)
            .transpose()
            .unwrap_or(None)
            .unwrap_or_default();

        let reputation =
            self.scoring
                .compute_wts(&signals, Some(&identity.wallet_address), None);
        Ok((Some(identity), Some(reputation), cache_hit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gate(rpc_urls: Vec<Url>, policy: TrustPolicy) -> TrustGate {
        TrustGate::new(
            Arc::new(InMemoryStorage::new()),
            rpc_urls,
            5.0,
            Some(Network::EthSepolia),
            policy,
            None,
        )
    }

    #[tokio::test]
    async fn unknown_recipient_with_permissive_policy_approves() {
        let server = MockServer::start().await;
        // balanceOf -> 0: no identity token.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": "0x0000000000000000000000000000000000000000000000000000000000000000"
            })))
            .mount(&server)
            .await;

        let gate = gate(
            vec![Url::parse(&server.uri()).unwrap()],
            TrustPolicy::permissive(),
        );
        let result = gate
            .evaluate("0xsomebody", Decimal::ONE, None, None, None)
            .await;
        assert_eq!(result.verdict, TrustVerdict::Approved);
        assert!(!result.identity_found);
    }

    #[tokio::test]
    async fn unknown_recipient_with_standard_policy_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": "0x0000000000000000000000000000000000000000000000000000000000000000"
            })))
            .mount(&server)
            .await;

        let gate = gate(
            vec![Url::parse(&server.uri()).unwrap()],
            TrustPolicy::standard(),
        );
        let result = gate
            .evaluate("0xsomebody", Decimal::ONE, None, None, None)
            .await;
        assert_eq!(result.verdict, TrustVerdict::Blocked);
        assert_eq!(result.block_reason.as_deref(), Some("NO_IDENTITY"));
    }

    #[tokio::test]
    async fn registry_error_applies_unresolvable_action() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut policy = TrustPolicy::permissive();
        policy.unresolvable_action = TrustVerdict::Held;
        let gate = gate(vec![Url::parse(&server.uri()).unwrap()], policy);
        let result = gate
            .evaluate("0xsomebody", Decimal::ONE, None, None, None)
            .await;
        assert_eq!(result.verdict, TrustVerdict::Held);
        assert!(result
            .block_reason
            .unwrap()
            .starts_with("REGISTRY_ERROR:"));
        assert!(result.flags.iter().any(|f| f == "registry_error"));
    }

    #[tokio::test]
    async fn blocklisted_recipient_blocks_without_lookup() {
        let mut policy = TrustPolicy::permissive();
        policy.address_blocklist = vec!["0xBAD".into()];
        // Unreachable RPC: the lookup fails, but permissive unresolvable
        // action keeps going and the blocklist check still fires.
        let gate = gate(vec![], policy);
        let result = gate.evaluate("0xbad", Decimal::ONE, None, None, None).await;
        assert_eq!(result.verdict, TrustVerdict::Blocked);
        assert_eq!(result.block_reason.as_deref(), Some("ADDRESS_BLOCKLISTED"));
    }

    #[tokio::test]
    async fn per_wallet_policy_override() {
        let gate = gate(vec![], TrustPolicy::permissive());
        gate.set_policy("w-strict", TrustPolicy::standard());
        assert_eq!(gate.policy(Some("w-strict")).policy_id, "preset_standard");
        assert_eq!(gate.policy(Some("w-other")).policy_id, "preset_permissive");
        assert_eq!(gate.policy(None).policy_id, "preset_permissive");
    }

    #[tokio::test]
    async fn second_evaluation_hits_cache() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_call"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": "0x0000000000000000000000000000000000000000000000000000000000000001"
            })))
            .mount(&server)
            .await;
        // The single mock answers every selector with "1", which decodes as
        // token id 1, an owner address, an empty-ish URI, and no clients.

        let gate = gate(
            vec![Url::parse(&server.uri()).unwrap()],
            TrustPolicy::permissive(),
        );
        let first = gate
            .evaluate("0xagent", Decimal::ONE, None, None, None)
            .await;
        assert!(!first.cache_hit);
        let second = gate
            .evaluate("0xagent", Decimal::ONE, None, None, None)
            .await;
        assert!(second.cache_hit, "identity should come from cache");
    }
}
