//! Webhook verification.
//!
//! HMAC signature generation and verification for inbound webhooks, with a
//! timestamp replay window. The signed material is `"<timestamp>.<raw body>"`.

use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::{Clock, SystemClock};
use crate::error::{IdentityError, WebhookError};
use crate::types::{
    header_value, WebhookEnvelope, WebhookEvent, WebhookVerification, EVENT_HEADER, ID_HEADER,
    SIGNATURE_HEADER, TIMESTAMP_HEADER,
};

/// Default replay window (5 minutes)
pub const DEFAULT_TIMESTAMP_TOLERANCE_SECS: u64 = 300;

/// HMAC digest used for signatures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl SignatureAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

macro_rules! hmac_hex {
    ($digest:ty, $secret:expr, $payload:expr) => {{
        let mut mac = Hmac::<$digest>::new_from_slice($secret)
            .expect("HMAC can take key of any size");
        mac.update($payload);
        hex::encode(mac.finalize().into_bytes())
    }};
}

/// Compute the lowercase hex HMAC of `payload`.
pub fn generate_signature(payload: &str, secret: &str, algorithm: SignatureAlgorithm) -> String {
    let (secret, payload) = (secret.as_bytes(), payload.as_bytes());
    match algorithm {
        SignatureAlgorithm::Sha256 => hmac_hex!(Sha256, secret, payload),
        SignatureAlgorithm::Sha384 => hmac_hex!(Sha384, secret, payload),
        SignatureAlgorithm::Sha512 => hmac_hex!(Sha512, secret, payload),
    }
}

/// Compare two byte strings in constant time.
///
/// Returns false immediately when the lengths differ, so the length of the
/// expected value is observable through timing.
pub fn timing_safe_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    constant_time_eq(a, b)
}

/// Compare the SHA-256 digests of two byte strings in constant time.
///
/// Unlike [`timing_safe_equal`] this does not reveal the input lengths.
pub fn timing_safe_equal_hashed(a: &[u8], b: &[u8]) -> bool {
    let a = Sha256::digest(a);
    let b = Sha256::digest(b);
    constant_time_eq(a.as_slice(), b.as_slice())
}

/// Check `signature` against the HMAC of `payload`.
pub fn verify_signature(
    payload: &str,
    signature: &str,
    secret: &str,
    algorithm: SignatureAlgorithm,
) -> bool {
    let expected = generate_signature(payload, secret, algorithm);
    timing_safe_equal(signature.as_bytes(), expected.as_bytes())
}

/// Check that `timestamp` (epoch seconds) is within `max_age_secs` of now, in
/// either direction.
pub fn verify_timestamp(timestamp: i64, max_age_secs: u64) -> bool {
    verify_timestamp_at(timestamp, SystemClock.now_secs(), max_age_secs)
}

/// [`verify_timestamp`] against an explicit current time.
pub fn verify_timestamp_at(timestamp: i64, now_secs: i64, max_age_secs: u64) -> bool {
    now_secs.abs_diff(timestamp) <= max_age_secs
}

/// Build the signed material for a raw body.
pub fn construct_payload(timestamp: i64, body: &str) -> String {
    format!("{}.{}", timestamp, body)
}

/// Build the signed material for a JSON body.
pub fn construct_json_payload(timestamp: i64, body: &serde_json::Value) -> String {
    construct_payload(timestamp, &body.to_string())
}

/// Options for [`verify_webhook`].
#[derive(Clone, Copy, Debug)]
pub struct WebhookVerifyOptions {
    /// Maximum distance between the delivery timestamp and now.
    pub tolerance: Duration,
    pub algorithm: SignatureAlgorithm,
}

impl Default for WebhookVerifyOptions {
    fn default() -> Self {
        Self {
            tolerance: Duration::from_secs(DEFAULT_TIMESTAMP_TOLERANCE_SECS),
            algorithm: SignatureAlgorithm::default(),
        }
    }
}

/// Verify a webhook delivery from its raw body and headers.
///
/// Checks, in order: signature header present, timestamp header present and
/// numeric, timestamp within the window, signature matches.
pub fn verify_webhook(
    body: &str,
    headers: &HashMap<String, String>,
    secret: &str,
    options: &WebhookVerifyOptions,
) -> WebhookVerification {
    let envelope = WebhookEnvelope::from_headers(headers, body);
    match check_envelope(&envelope, secret, options, SystemClock.now_secs()) {
        Ok(_) => WebhookVerification::valid(),
        Err(e) => WebhookVerification::invalid(e.to_string()),
    }
}

fn check_envelope(
    envelope: &WebhookEnvelope,
    secret: &str,
    options: &WebhookVerifyOptions,
    now_secs: i64,
) -> Result<i64, WebhookError> {
    let signature = envelope
        .signature_header
        .as_deref()
        .ok_or(WebhookError::MissingSignature)?;

    let raw_timestamp = envelope
        .timestamp_header
        .as_deref()
        .ok_or(WebhookError::MissingTimestamp)?;

    let timestamp: i64 = raw_timestamp.trim().parse().map_err(|_| {
        warn!(timestamp = raw_timestamp, "Invalid webhook timestamp format");
        WebhookError::InvalidTimestamp {
            value: raw_timestamp.to_string(),
        }
    })?;

    if !verify_timestamp_at(timestamp, now_secs, options.tolerance.as_secs()) {
        warn!(
            timestamp,
            now = now_secs,
            tolerance = options.tolerance.as_secs(),
            "Webhook timestamp outside tolerance"
        );
        return Err(WebhookError::TimestampOutOfWindow { timestamp });
    }

    let payload = construct_payload(timestamp, &envelope.raw_body);
    if !verify_signature(&payload, signature, secret, options.algorithm) {
        warn!("Webhook signature verification failed");
        return Err(WebhookError::InvalidSignature);
    }

    debug!(timestamp, "Webhook signature verified");
    Ok(timestamp)
}

/// Webhook verifier bound to one signing secret.
pub struct WebhookVerifier {
    secret: SecretString,
    options: WebhookVerifyOptions,
    clock: Arc<dyn Clock>,
}

impl WebhookVerifier {
    /// Create a new verifier with the signing secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: SecretString::new(secret.into()),
            options: WebhookVerifyOptions::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Set custom timestamp tolerance
    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.options.tolerance = tolerance;
        self
    }

    pub fn with_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.options.algorithm = algorithm;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &WebhookVerifyOptions {
        &self.options
    }

    /// Verify an inbound delivery.
    pub fn verify(&self, envelope: &WebhookEnvelope) -> Result<(), IdentityError> {
        self.check(envelope).map(|_| ())
    }

    /// Verify a delivery given as raw headers and body.
    pub fn verify_request(
        &self,
        headers: &HashMap<String, String>,
        body: &str,
    ) -> WebhookVerification {
        match self.check(&WebhookEnvelope::from_headers(headers, body)) {
            Ok(_) => WebhookVerification::valid(),
            Err(e) => WebhookVerification::invalid(match e {
                IdentityError::Webhook(inner) => inner.to_string(),
                other => other.to_string(),
            }),
        }
    }

    /// Signature a sender would attach for `body` at `timestamp`.
    pub fn sign(&self, timestamp: i64, body: &str) -> String {
        generate_signature(
            &construct_payload(timestamp, body),
            self.secret.expose_secret(),
            self.options.algorithm,
        )
    }

    /// Signature and timestamp headers for sending `body` now.
    pub fn signed_headers(&self, body: &str) -> HashMap<String, String> {
        let timestamp = self.clock.now_secs();
        let mut headers = HashMap::new();
        headers.insert(SIGNATURE_HEADER.to_string(), self.sign(timestamp, body));
        headers.insert(TIMESTAMP_HEADER.to_string(), timestamp.to_string());
        headers
    }

    /// Verify a delivery and parse its JSON body into an event.
    pub fn parse_event(
        &self,
        headers: &HashMap<String, String>,
        body: &str,
    ) -> Result<WebhookEvent, IdentityError> {
        let timestamp = self.check(&WebhookEnvelope::from_headers(headers, body))?;

        let payload: serde_json::Value =
            serde_json::from_str(body).map_err(|e| WebhookError::InvalidPayload {
                message: e.to_string(),
            })?;

        Ok(WebhookEvent {
            id: header_value(headers, ID_HEADER).map(String::from),
            event_type: header_value(headers, EVENT_HEADER).map(String::from),
            timestamp,
            payload,
        })
    }

    fn check(&self, envelope: &WebhookEnvelope) -> Result<i64, IdentityError> {
        Ok(check_envelope(
            envelope,
            self.secret.expose_secret(),
            &self.options,
            self.clock.now_secs(),
        )?)
    }
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"[REDACTED]")
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MockClock;

    const SECRET: &str = "whsec_test_secret";
    const NOW_SECS: i64 = 1_700_000_000;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(SECRET).with_clock(Arc::new(MockClock::new(NOW_SECS * 1000)))
    }

    fn headers(signature: Option<&str>, timestamp: Option<&str>) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(s) = signature {
            headers.insert("X-Webhook-Signature".to_string(), s.to_string());
        }
        if let Some(t) = timestamp {
            headers.insert("X-Webhook-Timestamp".to_string(), t.to_string());
        }
        headers
    }

    #[test]
    fn test_known_signature() {
        // RFC 4231 test case 2
        let signature = generate_signature(
            "what do ya want for nothing?",
            "Jefe",
            SignatureAlgorithm::Sha256,
        );
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_signature_lengths_per_algorithm() {
        assert_eq!(generate_signature("p", "s", SignatureAlgorithm::Sha256).len(), 64);
        assert_eq!(generate_signature("p", "s", SignatureAlgorithm::Sha384).len(), 96);
        assert_eq!(generate_signature("p", "s", SignatureAlgorithm::Sha512).len(), 128);
    }

    #[test]
    fn test_sign_verify_and_tamper() {
        let payload = construct_payload(NOW_SECS, r#"{"event":"user.created"}"#);
        let signature = generate_signature(&payload, SECRET, SignatureAlgorithm::Sha256);
        assert!(verify_signature(&payload, &signature, SECRET, SignatureAlgorithm::Sha256));

        let mut tampered = payload.clone().into_bytes();
        tampered[12] ^= 0x01;
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(!verify_signature(&tampered, &signature, SECRET, SignatureAlgorithm::Sha256));

        assert!(!verify_signature(&payload, &signature, "other", SignatureAlgorithm::Sha256));
        assert!(!verify_signature(&payload, &signature, SECRET, SignatureAlgorithm::Sha512));
    }

    #[test]
    fn test_timing_safe_equal() {
        assert!(timing_safe_equal(b"abc", b"abc"));
        assert!(!timing_safe_equal(b"abc", b"abd"));
        assert!(!timing_safe_equal(b"abc", b"abcd"));

        assert!(timing_safe_equal_hashed(b"abc", b"abc"));
        assert!(!timing_safe_equal_hashed(b"abc", b"abcd"));
    }

    #[test]
    fn test_verify_timestamp_window() {
        assert!(verify_timestamp_at(NOW_SECS, NOW_SECS, 300));
        assert!(verify_timestamp_at(NOW_SECS - 250, NOW_SECS, 300));
        assert!(verify_timestamp_at(NOW_SECS - 300, NOW_SECS, 300));
        assert!(!verify_timestamp_at(NOW_SECS - 301, NOW_SECS, 300));
        assert!(!verify_timestamp_at(NOW_SECS + 301, NOW_SECS, 300));

        let now = SystemClock.now_secs();
        assert!(verify_timestamp(now, DEFAULT_TIMESTAMP_TOLERANCE_SECS));
        assert!(!verify_timestamp(now - 3_600, DEFAULT_TIMESTAMP_TOLERANCE_SECS));
    }

    #[test]
    fn test_extreme_timestamps_are_out_of_window() {
        assert!(!verify_timestamp_at(i64::MIN, NOW_SECS, 300));
        assert!(!verify_timestamp_at(i64::MAX, NOW_SECS, 300));
        assert!(!verify_timestamp_at(i64::MIN, i64::MAX, u64::MAX - 1));

        let verifier = verifier();
        let min = i64::MIN.to_string();
        let result = verifier.verify_request(&headers(Some("bad"), Some(&min)), "{}");
        assert!(!result.valid);

        let result = verify_webhook(
            "{}",
            &headers(Some("bad"), Some(&min)),
            SECRET,
            &WebhookVerifyOptions::default(),
        );
        assert!(!result.valid);
    }

    #[test]
    fn test_construct_payload() {
        assert_eq!(construct_payload(12, "body"), "12.body");
        assert_eq!(
            construct_json_payload(12, &serde_json::json!({"a": 1})),
            r#"12.{"a":1}"#
        );
    }

    #[test]
    fn test_verify_webhook_round_trip() {
        let body = r#"{"event":"session.revoked"}"#;
        let now = SystemClock.now_secs();
        let signature = generate_signature(
            &construct_payload(now, body),
            SECRET,
            SignatureAlgorithm::Sha256,
        );
        let headers = headers(Some(&signature), Some(&now.to_string()));

        let result = verify_webhook(body, &headers, SECRET, &WebhookVerifyOptions::default());
        assert_eq!(result, WebhookVerification::valid());

        let result = verify_webhook(body, &headers, "wrong", &WebhookVerifyOptions::default());
        assert_eq!(result, WebhookVerification::invalid("Invalid signature"));
    }

    #[test]
    fn test_verification_order() {
        let verifier = verifier();
        let body = "{}";
        let good = verifier.sign(NOW_SECS, body);
        let ts = NOW_SECS.to_string();
        let stale = (NOW_SECS - 301).to_string();

        let cases = [
            (headers(None, Some(&ts)), WebhookError::MissingSignature),
            (headers(Some(&good), None), WebhookError::MissingTimestamp),
            (
                headers(Some(&good), Some("soon")),
                WebhookError::InvalidTimestamp {
                    value: "soon".to_string(),
                },
            ),
            (
                headers(Some("bad"), Some(&stale)),
                WebhookError::TimestampOutOfWindow {
                    timestamp: NOW_SECS - 301,
                },
            ),
            (headers(Some("bad"), Some(&ts)), WebhookError::InvalidSignature),
        ];

        for (headers, expected) in cases {
            let envelope = WebhookEnvelope::from_headers(&headers, body);
            match verifier.verify(&envelope) {
                Err(IdentityError::Webhook(actual)) => assert_eq!(actual, expected),
                other => panic!("expected {:?}, got {:?}", expected, other),
            }
        }

        let envelope = WebhookEnvelope::from_headers(&headers(Some(&good), Some(&ts)), body);
        assert!(verifier.verify(&envelope).is_ok());
    }

    #[test]
    fn test_verify_request_reports_reason() {
        let verifier = verifier();
        let result = verifier.verify_request(&headers(None, None), "{}");
        assert_eq!(result, WebhookVerification::invalid("Missing signature header"));
    }

    #[test]
    fn test_signed_headers_verify() {
        let verifier = verifier();
        let body = r#"{"user":"u1"}"#;
        let mut headers = verifier.signed_headers(body);
        headers.insert(EVENT_HEADER.to_string(), "user.updated".to_string());
        headers.insert(ID_HEADER.to_string(), "evt_1".to_string());

        let event = verifier.parse_event(&headers, body).unwrap();
        assert_eq!(event.event_type.as_deref(), Some("user.updated"));
        assert_eq!(event.id.as_deref(), Some("evt_1"));
        assert_eq!(event.timestamp, NOW_SECS);
        assert_eq!(event.payload["user"], "u1");
    }

    #[test]
    fn test_parse_event_rejects_non_json() {
        let verifier = verifier();
        let headers = verifier.signed_headers("not json");
        let result = verifier.parse_event(&headers, "not json");
        assert!(matches!(
            result,
            Err(IdentityError::Webhook(WebhookError::InvalidPayload { .. }))
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", verifier());
        assert!(!debug.contains(SECRET));
    }
}
