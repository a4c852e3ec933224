//! Token Types
//!
//! Credential record held by the token manager and the refresh wire shapes.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{IdentityError, TokenError};

/// The single credential record persisted per token manager.
///
/// Replaced wholesale on every refresh; never partially mutated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Short-lived bearer credential.
    pub access_token: String,
    /// Longer-lived credential exchanged for a new access token.
    pub refresh_token: String,
    /// Expiry as epoch milliseconds.
    pub expires_at: i64,
}

impl CredentialRecord {
    /// Create new credential record.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// Build a record from a token response received at `now_ms`.
    ///
    /// `fallback_refresh_token` is used when the server does not rotate the
    /// refresh token.
    pub fn from_response(
        response: &TokenResponse,
        now_ms: i64,
        fallback_refresh_token: Option<&str>,
    ) -> Result<Self, IdentityError> {
        let refresh_token = response
            .refresh_token
            .as_deref()
            .or(fallback_refresh_token)
            .ok_or(TokenError::NoRefreshToken)?;

        if response.expires_in == 0 {
            return Err(TokenError::InvalidRecord {
                message: "expires_in must be positive".to_string(),
            }
            .into());
        }

        let expires_at = i64::try_from(response.expires_in)
            .ok()
            .and_then(|secs| secs.checked_mul(1000))
            .and_then(|ms| now_ms.checked_add(ms))
            .ok_or_else(|| TokenError::InvalidRecord {
                message: format!("expires_in {} is out of range", response.expires_in),
            })?;

        let record = Self {
            access_token: response.access_token.clone(),
            refresh_token: refresh_token.to_string(),
            expires_at,
        };
        record.validate()?;
        Ok(record)
    }

    /// Check that all fields are present.
    pub fn validate(&self) -> Result<(), IdentityError> {
        if self.access_token.is_empty() {
            return Err(IdentityError::Validation {
                message: "access_token is required".to_string(),
            });
        }
        if self.refresh_token.is_empty() {
            return Err(IdentityError::Validation {
                message: "refresh_token is required".to_string(),
            });
        }
        Ok(())
    }

    /// Valid strictly before `expires_at`; a record expiring exactly now is not.
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        self.expires_at > now_ms
    }

    /// Check if the record expires within `threshold` of `now_ms`.
    pub fn expires_within(&self, now_ms: i64, threshold: Duration) -> bool {
        let threshold_ms = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);
        self.expires_at.saturating_sub(now_ms) <= threshold_ms
    }

    /// Remaining lifetime, zero once expired.
    pub fn remaining_lifetime(&self, now_ms: i64) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(now_ms).max(0) as u64)
    }

    /// Expiry as a UTC timestamp.
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.expires_at).single()
    }

    /// Format as Authorization header value.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token response from the identity service (refresh, sign-in, callback).
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Refresh token, absent when the service does not rotate it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds.
    pub expires_in: u64,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Body sent to the refresh endpoint.
#[derive(Clone, Serialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}
