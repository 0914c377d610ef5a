//! Policy engine: ten ordered checks, first failure wins.
//!
//! 1. Address blocklist -> BLOCKED
//! 2. Org whitelist -> APPROVED (short-circuit)
//! 3. Identity required -> BLOCKED
//! 4. Fraud tag -> policy's `fraud_tag_action`
//! 5. New agent -> policy's `new_agent_action`
//! 6. Min feedback count -> HELD
//! 7. Min WTS -> BLOCKED
//! 8. High-value WTS -> HELD
//! 9. Required attestations -> HELD
//! 10. APPROVED

use rust_decimal::Decimal;
use std::collections::HashSet;

use super::types::{AgentIdentity, ReputationScore, TrustCheckResult, TrustPolicy, TrustVerdict};

/// Evaluates a [`TrustPolicy`] against identity and reputation data.
/// Deterministic: the same inputs always produce the same verdict.
#[derive(Default)]
pub struct PolicyEngine;

impl PolicyEngine {
    pub fn evaluate(
        &self,
        identity: Option<&AgentIdentity>,
        reputation: Option<&ReputationScore>,
        amount: Decimal,
        recipient: &str,
        policy: &TrustPolicy,
    ) -> TrustCheckResult {
        let mut result = TrustCheckResult {
            identity_found: identity.is_some(),
            token_id: identity.map(|i| i.agent_id),
            organization: identity.and_then(|i| i.organization.clone()),
            wts: reputation.map(|r| r.wts),
            sample_size: reputation.map(|r| r.sample_size).unwrap_or(0),
            new_agent: reputation.map(|r| r.new_agent).unwrap_or(true),
            flags: reputation.map(|r| r.flags.clone()).unwrap_or_default(),
            attestations: identity.map(|i| i.attestations.clone()).unwrap_or_default(),
            policy_id: Some(policy.policy_id.clone()),
            verdict: TrustVerdict::Approved,
            block_reason: None,
            check_latency_ms: 0,
            cache_hit: false,
            checked_at: None,
        };

        // 1. Blocklist beats everything, including the whitelist.
        if Self::is_blocklisted(recipient, policy) {
            result.verdict = TrustVerdict::Blocked;
            result.block_reason = Some("ADDRESS_BLOCKLISTED".into());
            result.flags.push("blocklisted".into());
            tracing::info!(%recipient, "trust blocked: address blocklisted");
            return result;
        }

        // 2. Whitelist short-circuits the remaining checks.
        if identity.is_some_and(|i| Self::is_whitelisted(i, policy)) {
            result.verdict = TrustVerdict::Approved;
            tracing::debug!(%recipient, "trust approved: org whitelist match");
            return result;
        }

        // 3. Identity requirement.
        if policy.identity_required && identity.is_none() {
            result.verdict = TrustVerdict::Blocked;
            result.block_reason = Some("NO_IDENTITY".into());
            result.flags.push("no_identity".into());
            tracing::info!(%recipient, "trust blocked: no on-chain identity");
            return result;
        }

        // 4. Fraud tag.
        if reputation.is_some_and(|r| r.flags.iter().any(|f| f == "fraud")) {
            result.verdict = policy.fraud_tag_action;
            result.block_reason = Some("FRAUD_TAG".into());
            tracing::warn!(%recipient, verdict = ?policy.fraud_tag_action, "fraud tag on agent");
            return result;
        }

        // 5. New agent: a small sample, or an identity with no reputation.
        let is_new = reputation.map(|r| r.new_agent).unwrap_or(false)
            || (identity.is_some() && reputation.is_none());
        if is_new && policy.new_agent_action != TrustVerdict::Approved {
            result.verdict = policy.new_agent_action;
            result.block_reason = Some("NEW_AGENT".into());
            tracing::info!(%recipient, verdict = ?policy.new_agent_action, "new agent");
            return result;
        }

        // 6. Minimum feedback count.
        let sample = reputation.map(|r| r.sample_size).unwrap_or(0);
        if policy.min_feedback_count > 0 && sample < policy.min_feedback_count {
            result.verdict = TrustVerdict::Held;
            result.block_reason = Some("INSUFFICIENT_FEEDBACK".into());
            tracing::info!(
                %recipient,
                sample,
                required = policy.min_feedback_count,
                "insufficient feedback"
            );
            return result;
        }

        // 7. Minimum WTS.
        let wts = reputation.map(|r| r.wts).unwrap_or(0);
        if policy.min_wts > 0 && wts < policy.min_wts {
            result.verdict = TrustVerdict::Blocked;
            result.block_reason = Some("LOW_WTS".into());
            result.flags.push("low_wts".into());
            tracing::info!(%recipient, wts, min = policy.min_wts, "WTS below minimum");
            return result;
        }

        // 8. High-value payments need a stronger score. Boundary amount
        // triggers the check.
        if policy.high_value_threshold > Decimal::ZERO
            && amount >= policy.high_value_threshold
            && wts < policy.high_value_min_wts
        {
            result.verdict = TrustVerdict::Held;
            result.block_reason = Some("HIGH_VALUE_WTS_FAIL".into());
            tracing::info!(
                %recipient,
                %amount,
                wts,
                required = policy.high_value_min_wts,
                "high-value WTS check failed"
            );
            return result;
        }

        // 9. Required attestations.
        if !policy.require_attestations.is_empty() {
            let held: HashSet<&str> = identity
                .map(|i| i.attestations.iter().map(String::as_str).collect())
                .unwrap_or_default();
            let mut missing: Vec<&str> = policy
                .require_attestations
                .iter()
                .map(String::as_str)
                .filter(|required| !held.contains(required))
                .collect();
            if !missing.is_empty() {
                missing.sort_unstable();
                result.verdict = TrustVerdict::Held;
                result.block_reason =
                    Some(format!("MISSING_ATTESTATIONS:{}", missing.join(",")));
                tracing::info!(%recipient, ?missing, "missing attestations");
                return result;
            }
        }

        // 10. Everything passed.
        result.verdict = TrustVerdict::Approved;
        tracing::debug!(%recipient, wts, "trust approved");
        result
    }

    fn is_blocklisted(address: &str, policy: &TrustPolicy) -> bool {
        policy
            .address_blocklist
            .iter()
            .any(|blocked| blocked.eq_ignore_ascii_case(address))
    }

    fn is_whitelisted(identity: &AgentIdentity, policy: &TrustPolicy) -> bool {
        let Some(org) = &identity.organization else {
            return false;
        };
        policy
            .org_whitelist
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(org))
    }
}
