//! Framework-agnostic webhook ingress.
//!
//! Accepts a raw body plus headers (or an already-parsed object), verifies
//! the Ed25519 signature in `x-circle-signature` against the configured
//! public key, and maps the payload into a typed [`WebhookEvent`]. Transport
//! is the host application's problem.

use chrono::{DateTime, Utc};
use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::util::Base64Bytes;

/// Signature header attached by the provider.
pub const SIGNATURE_HEADER: &str = "x-circle-signature";

/// Event categories the orchestrator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    PaymentCompleted,
    PaymentFailed,
    PaymentCanceled,
    Unknown,
}

/// A verified, parsed webhook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: NotificationType,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    pub raw_payload: Value,
}

/// Incoming webhook payload: raw bytes (signature verified) or an object
/// something upstream already parsed (signature skipped).
pub enum WebhookPayload<'a> {
    Raw(&'a [u8]),
    Parsed(Value),
}

impl<'a> From<&'a [u8]> for WebhookPayload<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        WebhookPayload::Raw(bytes)
    }
}

impl<'a> From<&'a str> for WebhookPayload<'a> {
    fn from(s: &'a str) -> Self {
        WebhookPayload::Raw(s.as_bytes())
    }
}

impl From<Value> for WebhookPayload<'_> {
    fn from(value: Value) -> Self {
        WebhookPayload::Parsed(value)
    }
}

/// Verifies and parses webhook requests.
pub struct WebhookParser {
    verification_key: Option<String>,
}

impl WebhookParser {
    /// Without a key, signature verification is skipped.
    pub fn new(verification_key: Option<String>) -> Self {
        WebhookParser { verification_key }
    }

    /// Verify the Ed25519 signature over a raw payload.
    ///
    /// The configured key may be PEM, hex, or base64. Missing signature,
    /// undecodable key, or mismatch all raise [`Error::Validation`].
    pub fn verify_signature(
        &self,
        payload: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<()> {
        let Some(key_material) = &self.verification_key else {
            return Ok(());
        };

        let signature_b64 = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(SIGNATURE_HEADER))
            .map(|(_, value)| value.as_str())
            .ok_or_else(|| Error::Validation(format!("Missing {SIGNATURE_HEADER} header")))?;

        let signature_bytes = Base64Bytes::from(signature_b64)
            .decode()
            .map_err(|_| Error::Validation("Invalid base64 signature".into()))?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|_| Error::Validation("Signature must be 64 bytes".into()))?;

        let key = Self::load_key(key_material)?;
        key.verify_strict(payload, &signature)
            .map_err(|_| Error::Validation("Signature mismatch".into()))
    }

    fn load_key(material: &str) -> Result<VerifyingKey> {
        if material.contains("-----BEGIN PUBLIC KEY-----") {
            return VerifyingKey::from_public_key_pem(material)
                .map_err(|e| Error::Validation(format!("Invalid PEM key: {e}")));
        }
        if let Ok(bytes) = hex::decode(material.trim_start_matches("0x")) {
            if let Ok(array) = <[u8; 32]>::try_from(bytes.as_slice()) {
                if let Ok(key) = VerifyingKey::from_bytes(&array) {
                    return Ok(key);
                }
            }
        }
        if let Ok(bytes) = Base64Bytes::from(material).decode() {
            if let Ok(array) = <[u8; 32]>::try_from(bytes.as_slice()) {
                if let Ok(key) = VerifyingKey::from_bytes(&array) {
                    return Ok(key);
                }
            }
        }
        Err(Error::Validation(
            "Could not parse verification key (expected PEM, hex, or base64)".into(),
        ))
    }

    /// Parse and validate a webhook request into a [`WebhookEvent`].
    pub fn handle(
        &self,
        payload: WebhookPayload<'_>,
        headers: &HashMap<String, String>,
    ) -> Result<WebhookEvent> {
        let data = match payload {
            WebhookPayload::Raw(bytes) => {
                self.verify_signature(bytes, headers)?;
                serde_json::from_slice::<Value>(bytes)
                    .map_err(|e| Error::Validation(format!("Invalid JSON payload: {e}")))?
            }
            WebhookPayload::Parsed(value) => value,
        };

        let notification_type = data
            .get("notificationType")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("Missing 'notificationType' in payload".into()))?;

        let event_type = if notification_type.contains("payment_completed") {
            NotificationType::PaymentCompleted
        } else if notification_type.contains("payment_failed") {
            NotificationType::PaymentFailed
        } else if notification_type.contains("payment_canceled") {
            NotificationType::PaymentCanceled
        } else {
            NotificationType::Unknown
        };

        let timestamp = data
            .get("customDate")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(WebhookEvent {
            id: data
                .get("notificationId")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            event_type,
            timestamp,
            data: data.get("notification").cloned().unwrap_or(Value::Null),
            raw_payload: data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use serde_json::json;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn signed_headers(key: &SigningKey, payload: &[u8]) -> HashMap<String, String> {
        let signature = key.sign(payload);
        HashMap::from([(
            SIGNATURE_HEADER.to_string(),
            Base64Bytes::encode(signature.to_bytes()).to_string(),
        )])
    }

    fn hex_public_key(key: &SigningKey) -> String {
        hex::encode(key.verifying_key().to_bytes())
    }

    #[test]
    fn parses_signed_payment_completed() {
        let key = signing_key();
        let payload = serde_json::to_vec(&json!({
            "notificationId": "n-1",
            "notificationType": "payments.payment_completed",
            "customDate": "2026-01-15T12:30:00+00:00",
            "notification": {"paymentId": "p-1"}
        }))
        .unwrap();
        let headers = signed_headers(&key, &payload);

        let parser = WebhookParser::new(Some(hex_public_key(&key)));
        let event = parser
            .handle(WebhookPayload::Raw(&payload), &headers)
            .unwrap();
        assert_eq!(event.id, "n-1");
        assert_eq!(event.event_type, NotificationType::PaymentCompleted);
        assert_eq!(event.data["paymentId"], "p-1");
        assert_eq!(event.timestamp.to_rfc3339(), "2026-01-15T12:30:00+00:00");
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let key = signing_key();
        let payload = br#"{"notificationType":"payments.payment_completed"}"#;
        let headers = signed_headers(&key, payload);

        let parser = WebhookParser::new(Some(hex_public_key(&key)));
        let tampered = br#"{"notificationType":"payments.payment_failed"}"#;
        let err = parser
            .handle(WebhookPayload::Raw(tampered), &headers)
            .unwrap_err();
        assert!(err.to_string().contains("Signature mismatch"));
    }

    #[test]
    fn missing_signature_header_fails() {
        let key = signing_key();
        let parser = WebhookParser::new(Some(hex_public_key(&key)));
        let err = parser
            .handle(WebhookPayload::Raw(b"{}"), &HashMap::new())
            .unwrap_err();
        assert!(err.to_string().contains(SIGNATURE_HEADER));
    }

    #[test]
    fn base64_key_material_works() {
        let key = signing_key();
        let payload = serde_json::to_vec(&json!({
            "notificationType": "payments.payment_canceled"
        }))
        .unwrap();
        let headers = signed_headers(&key, &payload);

        let b64_key = Base64Bytes::encode(key.verifying_key().to_bytes()).to_string();
        let parser = WebhookParser::new(Some(b64_key));
        let event = parser
            .handle(WebhookPayload::Raw(&payload), &headers)
            .unwrap();
        assert_eq!(event.event_type, NotificationType::PaymentCanceled);
    }

    #[test]
    fn parsed_payload_skips_signature() {
        let parser = WebhookParser::new(Some("unparseable-key".into()));
        let event = parser
            .handle(
                WebhookPayload::Parsed(json!({
                    "notificationType": "wallets.created"
                })),
                &HashMap::new(),
            )
            .unwrap();
        assert_eq!(event.event_type, NotificationType::Unknown);
        assert_eq!(event.id, "unknown");
    }

    #[test]
    fn missing_notification_type_is_invalid() {
        let parser = WebhookParser::new(None);
        let err = parser
            .handle(WebhookPayload::Raw(br#"{"hello": 1}"#), &HashMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("notificationType"));
    }

    #[test]
    fn bad_json_is_invalid() {
        let parser = WebhookParser::new(None);
        let err = parser
            .handle(WebhookPayload::Raw(b"not json"), &HashMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));
    }
}
