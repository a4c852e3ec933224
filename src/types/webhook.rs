//! Webhook Types
//!
//! Inbound webhook envelope, verification result and parsed event.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Header carrying the hex HMAC signature.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
/// Header carrying the delivery timestamp in epoch seconds.
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
/// Header carrying the event name.
pub const EVENT_HEADER: &str = "x-webhook-event";
/// Header carrying the delivery id.
pub const ID_HEADER: &str = "x-webhook-id";

/// Inbound webhook delivery. Verified and discarded per request.
#[derive(Clone, Debug)]
pub struct WebhookEnvelope {
    pub signature_header: Option<String>,
    pub timestamp_header: Option<String>,
    pub raw_body: String,
}

impl WebhookEnvelope {
    /// Extract the envelope from raw headers and body.
    pub fn from_headers(headers: &HashMap<String, String>, raw_body: impl Into<String>) -> Self {
        Self {
            signature_header: header_value(headers, SIGNATURE_HEADER).map(String::from),
            timestamp_header: header_value(headers, TIMESTAMP_HEADER).map(String::from),
            raw_body: raw_body.into(),
        }
    }
}

/// Case-insensitive header lookup.
pub fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Outcome of [`verify_webhook`](crate::webhook::verify_webhook).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WebhookVerification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookVerification {
    pub fn valid() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// Verified webhook event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Option<String>,
    pub event_type: Option<String>,
    pub timestamp: i64,
    pub payload: serde_json::Value,
}
