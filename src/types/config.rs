//! Configuration Types
//!
//! Identity client configuration types.

use secrecy::SecretString;
use std::time::Duration;
use url::Url;

use crate::error::IdentityError;
use crate::resilience::{CircuitBreakerConfig, RetryOptions};
use crate::token::{StorageKind, DEFAULT_REFRESH_INTERVAL, DEFAULT_REFRESH_THRESHOLD};
use crate::webhook::DEFAULT_TIMESTAMP_TOLERANCE_SECS;

/// Identity client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the identity service.
    pub base_url: Url,
    /// Endpoint paths, relative to `base_url`.
    pub endpoints: EndpointConfig,
    /// HTTP timeout.
    pub timeout: Duration,
    /// Key under which credentials are stored.
    pub storage_key: String,
    /// Credential store selection.
    pub storage: StorageKind,
    /// Interval between background expiry checks.
    pub refresh_interval: Duration,
    /// Remaining lifetime below which the background monitor refreshes.
    pub refresh_threshold: Duration,
    /// Retry policy for [`request`](crate::IdentityClient::request); `None` disables retries.
    pub retry: Option<RetryOptions<IdentityError>>,
    /// Circuit breaker guarding requests; `None` disables it.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Webhook signing secret.
    pub webhook_secret: Option<SecretString>,
    /// Webhook replay window.
    pub webhook_tolerance: Duration,
}

impl ClientConfig {
    /// Create configuration with defaults for everything but the base URL.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            endpoints: EndpointConfig::default(),
            timeout: Duration::from_secs(30),
            storage_key: crate::token::DEFAULT_STORAGE_KEY.to_string(),
            storage: StorageKind::default(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            retry: Some(RetryOptions::transient()),
            circuit_breaker: None,
            webhook_secret: None,
            webhook_tolerance: Duration::from_secs(DEFAULT_TIMESTAMP_TOLERANCE_SECS),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url.as_str())
            .field("endpoints", &self.endpoints)
            .field("timeout", &self.timeout)
            .field("storage_key", &self.storage_key)
            .field("storage", &self.storage)
            .field("refresh_interval", &self.refresh_interval)
            .field("refresh_threshold", &self.refresh_threshold)
            .field("retry", &self.retry)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "[REDACTED]"))
            .field("webhook_tolerance", &self.webhook_tolerance)
            .finish()
    }
}

/// Identity service endpoint paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    pub refresh: String,
    pub sign_in: String,
    pub mfa_verify: String,
    pub sign_out: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            refresh: "auth/refresh".to_string(),
            sign_in: "auth/sign-in".to_string(),
            mfa_verify: "auth/mfa/verify".to_string(),
            sign_out: "auth/sign-out".to_string(),
        }
    }
}
