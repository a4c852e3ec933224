//! Token Refresher
//!
//! Exchanges a refresh token for a new credential record.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::{Clock, HttpMethod, HttpRequest, HttpTransport};
use crate::error::{create_error_from_response, IdentityError, ProtocolError};
use crate::types::{CredentialRecord, RefreshTokenRequest, TokenResponse};

/// Token refresher interface.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange `refresh_token` for a new credential record.
    async fn refresh(&self, refresh_token: &str) -> Result<CredentialRecord, IdentityError>;
}

/// Refresher that calls the identity service's refresh endpoint.
pub struct HttpTokenRefresher {
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    endpoint: String,
    timeout: Option<Duration>,
}

impl HttpTokenRefresher {
    /// Create new HTTP refresher.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            clock,
            endpoint: endpoint.into(),
            timeout: None,
        }
    }

    /// Set a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<CredentialRecord, IdentityError> {
        let body = serde_json::to_string(&RefreshTokenRequest {
            refresh_token: refresh_token.to_string(),
        })
        .map_err(|e| ProtocolError::InvalidJson {
            message: e.to_string(),
        })?;

        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("accept".to_string(), "application/json".to_string());

        let request = HttpRequest {
            method: HttpMethod::Post,
            url: self.endpoint.clone(),
            headers,
            body: Some(body),
            timeout: self.timeout,
        };

        debug!(endpoint = %self.endpoint, "Refreshing credentials");
        let response = self.transport.send(request).await?;

        if !response.is_success() {
            return Err(create_error_from_response(
                response.status,
                &response.headers,
                &response.body,
            ));
        }

        let token_response: TokenResponse =
            serde_json::from_str(&response.body).map_err(|e| ProtocolError::InvalidJson {
                message: e.to_string(),
            })?;

        CredentialRecord::from_response(&token_response, self.clock.now_ms(), Some(refresh_token))
    }
}

/// Mock token refresher for testing.
#[derive(Default)]
pub struct MockTokenRefresher {
    calls: AtomicUsize,
    refresh_history: Mutex<Vec<String>>,
    next_records: Mutex<Vec<CredentialRecord>>,
    next_error: Mutex<Option<IdentityError>>,
    fail_always: Mutex<Option<IdentityError>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTokenRefresher {
    /// Create new mock refresher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a record to return; queued records are returned in order.
    pub fn queue_record(&self, record: CredentialRecord) -> &Self {
        self.next_records.lock().push(record);
        self
    }

    /// Fail the next refresh with `error`.
    pub fn set_next_error(&self, error: IdentityError) -> &Self {
        *self.next_error.lock() = Some(error);
        self
    }

    /// Fail every refresh with `error`.
    pub fn set_fail_always(&self, error: IdentityError) -> &Self {
        *self.fail_always.lock() = Some(error);
        self
    }

    /// Delay each refresh by `delay`.
    pub fn set_delay(&self, delay: Duration) -> &Self {
        *self.delay.lock() = Some(delay);
        self
    }

    /// Number of refresh calls made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Refresh tokens passed to each call.
    pub fn get_refresh_history(&self) -> Vec<String> {
        self.refresh_history.lock().clone()
    }
}

#[async_trait]
impl TokenRefresher for MockTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<CredentialRecord, IdentityError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.refresh_history.lock().push(refresh_token.to_string());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.fail_always.lock().clone() {
            return Err(error);
        }
        if let Some(error) = self.next_error.lock().take() {
            return Err(error);
        }

        let mut queued = self.next_records.lock();
        if !queued.is_empty() {
            return Ok(queued.remove(0));
        }

        Ok(CredentialRecord::new(
            format!("refreshed-access-{}", call),
            format!("refreshed-refresh-{}", call),
            i64::MAX,
        ))
    }
}

/// Create mock token refresher for testing.
pub fn create_mock_token_refresher() -> MockTokenRefresher {
    MockTokenRefresher::new()
}
