//! Configuration Builder
//!
//! Fluent builder for identity client configuration.

use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::{ConfigurationError, IdentityError};
use crate::resilience::{CircuitBreakerConfig, RetryOptions};
use crate::token::{CredentialStore, StorageKind};
use crate::types::{ClientConfig, EndpointConfig};

/// Environment variable holding the identity service base URL.
pub const ENV_BASE_URL: &str = "IDENTITY_BASE_URL";
/// Environment variable holding the HTTP timeout in seconds.
pub const ENV_TIMEOUT_SECS: &str = "IDENTITY_TIMEOUT_SECS";
/// Environment variable holding the credential storage key.
pub const ENV_STORAGE_KEY: &str = "IDENTITY_STORAGE_KEY";
/// Environment variable selecting a file-backed credential store directory.
pub const ENV_STORAGE_DIR: &str = "IDENTITY_STORAGE_DIR";
/// Environment variable holding the webhook signing secret.
pub const ENV_WEBHOOK_SECRET: &str = "IDENTITY_WEBHOOK_SECRET";

/// Identity client configuration builder.
pub struct ClientConfigBuilder {
    base_url: Option<String>,
    endpoints: EndpointConfig,
    timeout: Duration,
    storage_key: Option<String>,
    storage: StorageKind,
    refresh_interval: Option<Duration>,
    refresh_threshold: Option<Duration>,
    retry: Option<RetryOptions<IdentityError>>,
    circuit_breaker: Option<CircuitBreakerConfig>,
    webhook_secret: Option<SecretString>,
    webhook_tolerance: Option<Duration>,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfigBuilder {
    /// Create new configuration builder.
    pub fn new() -> Self {
        Self {
            base_url: None,
            endpoints: EndpointConfig::default(),
            timeout: Duration::from_secs(30),
            storage_key: None,
            storage: StorageKind::Memory,
            refresh_interval: None,
            refresh_threshold: None,
            retry: Some(RetryOptions::transient()),
            circuit_breaker: None,
            webhook_secret: None,
            webhook_tolerance: None,
        }
    }

    /// Create a builder seeded from `IDENTITY_*` environment variables.
    pub fn from_env() -> Result<Self, IdentityError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create a builder seeded from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, IdentityError> {
        let mut builder = Self::new();

        if let Some(base_url) = lookup(ENV_BASE_URL) {
            builder = builder.base_url(base_url);
        }

        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigurationError::InvalidConfig {
                message: format!("{} must be a whole number of seconds", ENV_TIMEOUT_SECS),
            })?;
            builder = builder.timeout(Duration::from_secs(secs));
        }

        if let Some(key) = lookup(ENV_STORAGE_KEY) {
            builder = builder.storage_key(key);
        }

        if let Some(dir) = lookup(ENV_STORAGE_DIR) {
            builder = builder.file_storage(dir);
        }

        if let Some(secret) = lookup(ENV_WEBHOOK_SECRET) {
            builder = builder.webhook_secret(secret);
        }

        Ok(builder)
    }

    /// Set the identity service base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the refresh endpoint path.
    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.endpoints.refresh = path.into();
        self
    }

    /// Set the sign-in endpoint path.
    pub fn sign_in_path(mut self, path: impl Into<String>) -> Self {
        self.endpoints.sign_in = path.into();
        self
    }

    /// Set the MFA verification endpoint path.
    pub fn mfa_path(mut self, path: impl Into<String>) -> Self {
        self.endpoints.mfa_verify = path.into();
        self
    }

    /// Set the sign-out endpoint path.
    pub fn sign_out_path(mut self, path: impl Into<String>) -> Self {
        self.endpoints.sign_out = path.into();
        self
    }

    /// Set request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the credential storage key.
    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = Some(key.into());
        self
    }

    /// Keep credentials in memory only.
    pub fn in_memory_storage(mut self) -> Self {
        self.storage = StorageKind::Memory;
        self
    }

    /// Persist credentials under `directory`.
    pub fn file_storage(mut self, directory: impl Into<PathBuf>) -> Self {
        self.storage = StorageKind::File(directory.into());
        self
    }

    /// Use a caller-supplied credential store.
    pub fn custom_storage(mut self, store: std::sync::Arc<dyn CredentialStore>) -> Self {
        self.storage = StorageKind::Custom(store);
        self
    }

    /// Set the background refresh check interval.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Set the remaining lifetime that triggers a background refresh.
    pub fn refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = Some(threshold);
        self
    }

    /// Set the retry policy for requests.
    pub fn retry(mut self, options: RetryOptions<IdentityError>) -> Self {
        self.retry = Some(options);
        self
    }

    /// Disable request retries.
    pub fn no_retry(mut self) -> Self {
        self.retry = None;
        self
    }

    /// Guard requests with a circuit breaker.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Set the webhook signing secret.
    pub fn webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(SecretString::new(secret.into()));
        self
    }

    /// Set the webhook replay window.
    pub fn webhook_tolerance(mut self, tolerance: Duration) -> Self {
        self.webhook_tolerance = Some(tolerance);
        self
    }

    /// Build the client configuration.
    pub fn build(self) -> Result<ClientConfig, IdentityError> {
        let raw_url = self.base_url.ok_or_else(|| {
            IdentityError::Configuration(ConfigurationError::MissingRequired {
                field: "base_url".to_string(),
            })
        })?;

        let base_url = Url::parse(&raw_url).map_err(|_| {
            IdentityError::Configuration(ConfigurationError::InvalidEndpoint {
                url: raw_url.clone(),
            })
        })?;

        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(IdentityError::Configuration(
                ConfigurationError::InvalidEndpoint { url: raw_url },
            ));
        }

        if self.timeout.is_zero() {
            return Err(IdentityError::Configuration(ConfigurationError::InvalidConfig {
                message: "timeout must be greater than zero".to_string(),
            }));
        }

        let mut config = ClientConfig::new(base_url);

        if let Some(key) = self.storage_key {
            if key.trim().is_empty() {
                return Err(IdentityError::Configuration(ConfigurationError::InvalidConfig {
                    message: "storage_key must not be empty".to_string(),
                }));
            }
            config.storage_key = key;
        }

        if let Some(interval) = self.refresh_interval {
            if interval.is_zero() {
                return Err(IdentityError::Configuration(ConfigurationError::InvalidConfig {
                    message: "refresh_interval must be greater than zero".to_string(),
                }));
            }
            config.refresh_interval = interval;
        }

        if let Some(breaker) = &self.circuit_breaker {
            if breaker.failure_threshold == 0 {
                return Err(IdentityError::Configuration(ConfigurationError::InvalidConfig {
                    message: "circuit breaker failure_threshold must be at least 1".to_string(),
                }));
            }
        }

        config.endpoints = self.endpoints;
        config.timeout = self.timeout;
        config.storage = self.storage;
        config.retry = self.retry;
        config.circuit_breaker = self.circuit_breaker;
        config.webhook_secret = self.webhook_secret;
        if let Some(threshold) = self.refresh_threshold {
            config.refresh_threshold = threshold;
        }
        if let Some(tolerance) = self.webhook_tolerance {
            config.webhook_tolerance = tolerance;
        }

        Ok(config)
    }
}

/// Create a new identity client configuration builder.
pub fn client_config() -> ClientConfigBuilder {
    ClientConfigBuilder::new()
}
