//! Weighted Trust Score aggregation.
//!
//! The registry stores indices, not wall-clock times, so recency decay is
//! index-band based: the top third of an agent's feedback (by index) weighs
//! 1.0, the middle third 0.5, the bottom third 0.2. Submitters holding a
//! registry identity of their own get a 1.5x boost.

use std::collections::HashSet;

use super::types::{FeedbackSignal, ReputationScore};

/// Tags that mark a signal as fraud-related.
const FRAUD_TAGS: &[&str] = &["fraud", "scam", "malicious", "spam", "phishing"];

/// Feedback entries below which an agent counts as new.
pub const MIN_SAMPLE_SIZE: usize = 3;

/// Band boundaries as fractions of the max feedback index.
const RECENT_BAND: f64 = 0.67;
const AGING_BAND: f64 = 0.33;

/// Computes a 0-100 WTS from raw feedback signals.
pub struct ReputationAggregator {
    aging_weight: f64,
    old_weight: f64,
    verified_boost: f64,
    min_sample_size: usize,
}

impl Default for ReputationAggregator {
    fn default() -> Self {
        ReputationAggregator {
            aging_weight: 0.5,
            old_weight: 0.2,
            verified_boost: 1.5,
            min_sample_size: MIN_SAMPLE_SIZE,
        }
    }
}

impl ReputationAggregator {
    pub fn new(
        aging_weight: f64,
        old_weight: f64,
        verified_boost: f64,
        min_sample_size: usize,
    ) -> Self {
        ReputationAggregator {
            aging_weight,
            old_weight,
            verified_boost,
            min_sample_size,
        }
    }

    /// Aggregate `signals` into a [`ReputationScore`].
    ///
    /// Revoked signals and self-reviews (submitter == `agent_owner`) are
    /// excluded from the sample but counted in the breakdown.
    pub fn compute_wts(
        &self,
        signals: &[FeedbackSignal],
        agent_owner: Option<&str>,
        verified_submitters: Option<&HashSet<String>>,
    ) -> ReputationScore {
        let verified_lower: HashSet<String> = verified_submitters
            .map(|set| set.iter().map(|a| a.to_lowercase()).collect())
            .unwrap_or_default();
        let owner_lower = agent_owner.map(str::to_lowercase);

        let total_count = signals.len();
        let (active, revoked): (Vec<_>, Vec<_>) = signals.iter().partition(|s| !s.is_revoked);

        let (self_reviews, eligible): (Vec<_>, Vec<_>) = active.into_iter().partition(|s| {
            owner_lower
                .as_deref()
                .is_some_and(|owner| s.client_address.eq_ignore_ascii_case(owner))
        });

        let mut flags: Vec<String> = Vec::new();
        let fraud_count = eligible
            .iter()
            .filter(|s| {
                let tag1 = s.tag1.to_lowercase();
                let tag2 = s.tag2.to_lowercase();
                FRAUD_TAGS.contains(&tag1.as_str()) || FRAUD_TAGS.contains(&tag2.as_str())
            })
            .count();
        if fraud_count > 0 {
            flags.push("fraud".into());
        }

        let sample_size = eligible.len();
        let new_agent = sample_size < self.min_sample_size;
        if new_agent {
            flags.push("new_agent".into());
        }

        let mut verified_count = 0;
        let wts = if eligible.is_empty() {
            if flags.is_empty() {
                flags.push("no_feedback".into());
            }
            0
        } else {
            let max_index = eligible.iter().map(|s| s.feedback_index).max().unwrap_or(0);
            let mut weighted_sum = 0.0;
            let mut weight_total = 0.0;
            for signal in &eligible {
                let score = signal.normalized_score().clamp(0.0, 100.0);
                let mut weight = self.recency_weight(signal.feedback_index, max_index);
                if verified_lower.contains(&signal.client_address.to_lowercase()) {
                    weight *= self.verified_boost;
                    verified_count += 1;
                }
                weighted_sum += score * weight;
                weight_total += weight;
            }
            if weight_total > 0.0 {
                (weighted_sum / weight_total).round() as i64
            } else {
                0
            }
        };
        let wts = wts.clamp(0, 100) as u8;

        if wts < 30 && !flags.iter().any(|f| f == "fraud") {
            flags.push("low_wts".into());
        }

        ReputationScore {
            wts,
            sample_size,
            new_agent,
            flags,
            total_feedback_count: total_count,
            revoked_count: revoked.len(),
            self_review_count: self_reviews.len(),
            verified_submitter_count: verified_count,
        }
    }

    fn recency_weight(&self, index: u64, max_index: u64) -> f64 {
        if max_index == 0 {
            return 1.0;
        }
        let position = index as f64 / max_index as f64;
        if position >= RECENT_BAND {
            1.0
        } else if position >= AGING_BAND {
            self.aging_weight
        } else {
            self.old_weight
        }
    }
}
