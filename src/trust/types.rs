//! Trust layer types: on-chain agent identity, reputation feedback, and the
//! operator policy evaluated against them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The registration-file `type` URI agents SHOULD carry.
pub const REGISTRATION_TYPE_URI: &str =
    "https://eips.ethereum.org/EIPS/eip-8004#registration-v1";

/// Outcome of a trust evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrustVerdict {
    Approved,
    Blocked,
    Held,
}

/// A service endpoint advertised in the agent registration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentService {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Parsed identity: the registry's ERC-721 token plus the off-chain
/// registration file fetched from its URI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Registry token id.
    pub agent_id: u64,
    /// Owner address of the identity token.
    pub wallet_address: String,
    /// Payment address, when set on chain.
    #[serde(default)]
    pub agent_wallet: Option<String>,
    /// CAIP-style registry pointer, e.g. `eip155:1:0x8004...`.
    #[serde(default)]
    pub agent_registry: Option<String>,
    #[serde(default)]
    pub registration_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub services: Vec<AgentService>,
    #[serde(default)]
    pub x402_support: bool,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub supported_trust: Vec<String>,
    #[serde(default)]
    pub attestations: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl AgentIdentity {
    /// Bare identity from on-chain reads only.
    pub fn on_chain(agent_id: u64, wallet_address: String, agent_wallet: Option<String>) -> Self {
        AgentIdentity {
            agent_id,
            wallet_address,
            agent_wallet,
            agent_registry: None,
            registration_type: None,
            name: None,
            description: None,
            organization: None,
            services: Vec::new(),
            x402_support: false,
            active: true,
            supported_trust: Vec::new(),
            attestations: Vec::new(),
        }
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services
            .iter()
            .any(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Merge an agent registration JSON file into the identity.
    ///
    /// The `type` field SHOULD be [`REGISTRATION_TYPE_URI`]; unexpected
    /// values are tolerated with a warning since agents ship older drafts.
    pub fn apply_registration_file(&mut self, data: &Value) {
        let reg_type = data.get("type").and_then(Value::as_str);
        match reg_type {
            None => tracing::warn!(
                agent_id = self.agent_id,
                "registration file missing 'type' (expected {REGISTRATION_TYPE_URI})"
            ),
            Some(t) if t != REGISTRATION_TYPE_URI => tracing::warn!(
                agent_id = self.agent_id,
                "registration file has unexpected type {t}"
            ),
            _ => {}
        }
        self.registration_type = reg_type.map(str::to_owned);
        self.name = data.get("name").and_then(Value::as_str).map(str::to_owned);
        self.description = data
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_owned);
        self.organization = data
            .get("organization")
            .and_then(Value::as_str)
            .map(str::to_owned);
        self.x402_support = data
            .get("x402Support")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.active = data.get("active").and_then(Value::as_bool).unwrap_or(true);
        self.supported_trust = data
            .get("supportedTrust")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        self.services = data
            .get("services")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|s| {
                        Some(AgentService {
                            name: s.get("name")?.as_str()?.to_string(),
                            endpoint: s
                                .get("endpoint")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            version: s
                                .get("version")
                                .and_then(Value::as_str)
                                .map(str::to_owned),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        // Pick the registration entry matching our token id, else the first.
        if let Some(registrations) = data.get("registrations").and_then(Value::as_array) {
            let matching = registrations
                .iter()
                .find(|r| r.get("agentId").and_then(Value::as_u64) == Some(self.agent_id))
                .or_else(|| registrations.first());
            self.agent_registry = matching
                .and_then(|r| r.get("agentRegistry"))
                .and_then(Value::as_str)
                .map(str::to_owned);
        }
    }
}

/// Single feedback entry from the reputation registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackSignal {
    pub agent_id: u64,
    pub client_address: String,
    pub feedback_index: u64,
    /// Raw int128 value; may be negative.
    pub value: i128,
    /// 0..=18 decimal places on `value`.
    pub value_decimals: u8,
    #[serde(default)]
    pub tag1: String,
    #[serde(default)]
    pub tag2: String,
    #[serde(default)]
    pub is_revoked: bool,
}

impl FeedbackSignal {
    /// `value / 10^value_decimals` as a float score.
    pub fn normalized_score(&self) -> f64 {
        if self.value_decimals == 0 {
            return self.value as f64;
        }
        self.value as f64 / 10f64.powi(self.value_decimals as i32)
    }
}

/// Weighted Trust Score computed by the reputation aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationScore {
    /// 0-100.
    pub wts: u8,
    /// Feedback entries that counted.
    pub sample_size: usize,
    pub new_agent: bool,
    pub flags: Vec<String>,
    // Breakdown
    pub total_feedback_count: usize,
    pub revoked_count: usize,
    pub self_review_count: usize,
    pub verified_submitter_count: usize,
}

/// Full result of a trust evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustCheckResult {
    pub identity_found: bool,
    #[serde(default)]
    pub token_id: Option<u64>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub wts: Option<u8>,
    pub sample_size: usize,
    pub new_agent: bool,
    pub flags: Vec<String>,
    pub attestations: Vec<String>,
    #[serde(default)]
    pub policy_id: Option<String>,
    pub verdict: TrustVerdict,
    #[serde(default)]
    pub block_reason: Option<String>,
    pub check_latency_ms: u64,
    pub cache_hit: bool,
    #[serde(default)]
    pub checked_at: Option<DateTime<Utc>>,
}

/// Operator-configured trust policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustPolicy {
    pub policy_id: String,
    pub name: String,
    pub identity_required: bool,
    /// Minimum WTS, 0-100.
    pub min_wts: u8,
    pub min_feedback_count: usize,
    pub require_attestations: Vec<String>,
    pub org_whitelist: Vec<String>,
    pub address_blocklist: Vec<String>,
    pub new_agent_action: TrustVerdict,
    pub fraud_tag_action: TrustVerdict,
    pub unresolvable_action: TrustVerdict,
    pub high_value_threshold: Decimal,
    pub high_value_min_wts: u8,
}

impl TrustPolicy {
    /// Lenient: pass everything, block only known fraud.
    pub fn permissive() -> Self {
        TrustPolicy {
            policy_id: "preset_permissive".into(),
            name: "Permissive".into(),
            identity_required: false,
            min_wts: 0,
            min_feedback_count: 0,
            require_attestations: Vec::new(),
            org_whitelist: Vec::new(),
            address_blocklist: Vec::new(),
            new_agent_action: TrustVerdict::Approved,
            fraud_tag_action: TrustVerdict::Blocked,
            unresolvable_action: TrustVerdict::Approved,
            high_value_threshold: Decimal::ZERO,
            high_value_min_wts: 0,
        }
    }

    /// Balanced: hold new or unverified agents.
    pub fn standard() -> Self {
        TrustPolicy {
            policy_id: "preset_standard".into(),
            name: "Standard".into(),
            identity_required: true,
            min_wts: 50,
            min_feedback_count: 3,
            require_attestations: Vec::new(),
            org_whitelist: Vec::new(),
            address_blocklist: Vec::new(),
            new_agent_action: TrustVerdict::Held,
            fraud_tag_action: TrustVerdict::Blocked,
            unresolvable_action: TrustVerdict::Held,
            high_value_threshold: Decimal::from(500),
            high_value_min_wts: 75,
        }
    }

    /// Enterprise: identity plus high reputation plus attestations.
    pub fn strict() -> Self {
        TrustPolicy {
            policy_id: "preset_strict".into(),
            name: "Strict".into(),
            identity_required: true,
            min_wts: 70,
            min_feedback_count: 3,
            require_attestations: vec!["kyb".into()],
            org_whitelist: Vec::new(),
            address_blocklist: Vec::new(),
            new_agent_action: TrustVerdict::Held,
            fraud_tag_action: TrustVerdict::Blocked,
            unresolvable_action: TrustVerdict::Held,
            high_value_threshold: Decimal::from(500),
            high_value_min_wts: 85,
        }
    }
}
