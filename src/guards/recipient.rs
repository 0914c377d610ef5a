//! Recipient access-control guard. Stateless.
//!
//! Matches recipients against exact addresses (case-insensitive), substring
//! domains (for URL recipients), and compiled regex patterns. Whitelist mode
//! requires a match; blacklist mode requires no match.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{Guard, GuardResult, PaymentContext};
use crate::error::{Error, Result};

/// Matching polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecipientMode {
    #[default]
    Whitelist,
    Blacklist,
}

/// Guard restricting who may be paid.
pub struct RecipientGuard {
    name: String,
    mode: RecipientMode,
    addresses: HashSet<String>,
    domains: HashSet<String>,
    patterns: Vec<Regex>,
}

impl RecipientGuard {
    pub fn new(
        name: impl Into<String>,
        mode: RecipientMode,
        addresses: Vec<String>,
        domains: Vec<String>,
        patterns: Vec<String>,
    ) -> Result<Self> {
        let compiled = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| Error::Validation(format!("bad recipient pattern {p}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RecipientGuard {
            name: name.into(),
            mode,
            addresses: addresses.into_iter().map(|a| a.to_lowercase()).collect(),
            domains: domains.into_iter().map(|d| d.to_lowercase()).collect(),
            patterns: compiled,
        })
    }

    pub fn mode(&self) -> RecipientMode {
        self.mode
    }

    fn matches(&self, recipient: &str) -> bool {
        let lower = recipient.to_lowercase();
        if self.addresses.contains(&lower) {
            return true;
        }
        if self.domains.iter().any(|domain| lower.contains(domain)) {
            return true;
        }
        self.patterns.iter().any(|p| p.is_match(recipient))
    }
}

#[async_trait]
impl Guard for RecipientGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, context: &PaymentContext) -> GuardResult {
        let matches = self.matches(&context.recipient);
        match (self.mode, matches) {
            (RecipientMode::Whitelist, true) | (RecipientMode::Blacklist, false) => {
                GuardResult::allow(&self.name)
            }
            (RecipientMode::Whitelist, false) => GuardResult::block(
                &self.name,
                format!("Recipient {} not in whitelist", context.recipient),
            ),
            (RecipientMode::Blacklist, true) => GuardResult::block(
                &self.name,
                format!("Recipient {} is blacklisted", context.recipient),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn context(recipient: &str) -> PaymentContext {
        PaymentContext::new("w-1", recipient, Decimal::ONE)
    }

    #[tokio::test]
    async fn whitelist_matches_case_insensitively() {
        let guard = RecipientGuard::new(
            "recipient",
            RecipientMode::Whitelist,
            vec!["0xAbCd000000000000000000000000000000000001".into()],
            vec![],
            vec![],
        )
        .unwrap();

        let allowed = guard
            .check(&context("0xabcd000000000000000000000000000000000001"))
            .await;
        assert!(allowed.allowed);

        let blocked = guard
            .check(&context("0x9999000000000000000000000000000000000009"))
            .await;
        assert!(!blocked.allowed);
        assert!(blocked.reason.unwrap().contains("whitelist"));
    }

    #[tokio::test]
    async fn domains_match_url_recipients() {
        let guard = RecipientGuard::new(
            "recipient",
            RecipientMode::Whitelist,
            vec![],
            vec!["api.example.com".into()],
            vec![],
        )
        .unwrap();
        assert!(
            guard
                .check(&context("https://api.example.com/premium"))
                .await
                .allowed
        );
        assert!(!guard.check(&context("https://evil.example.org")).await.allowed);
    }

    #[tokio::test]
    async fn blacklist_blocks_matches_only() {
        let guard = RecipientGuard::new(
            "recipient",
            RecipientMode::Blacklist,
            vec![],
            vec![],
            vec![r"^0xdead".into()],
        )
        .unwrap();
        assert!(
            !guard
                .check(&context("0xdeadbeef00000000000000000000000000000000"))
                .await
                .allowed
        );
        assert!(
            guard
                .check(&context("0xabcd000000000000000000000000000000000001"))
                .await
                .allowed
        );
    }

    #[test]
    fn bad_pattern_is_a_validation_error() {
        let result = RecipientGuard::new(
            "recipient",
            RecipientMode::Whitelist,
            vec![],
            vec![],
            vec!["(".into()],
        );
        assert!(result.is_err());
    }
}
