//! Identity Client
//!
//! High-level client combining sign-in, credential lifecycle, resilient
//! requests and webhook verification.

use parking_lot::Mutex;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::{
    join_path, ApiRequest, AuthenticatingTransport, Clock, HttpResponse, HttpTransport,
    ReqwestHttpTransport, SystemClock, DEFAULT_MAX_RESPONSE_SIZE,
};
use crate::error::{ConfigurationError, IdentityError, ProtocolError};
use crate::resilience::{is_retryable_error, with_retry, CircuitBreaker, CircuitBreakerState};
use crate::token::{
    AuthEvent, CredentialStore, EventRegistry, HttpTokenRefresher, RefreshMonitor, Subscription,
    TokenManager, TokenManagerConfig,
};
use crate::types::{
    ClientConfig, CredentialRecord, MfaVerification, RefreshTokenRequest, SignInCredentials,
    SignInOutcome, SignInResponse, TokenResponse, WebhookEvent, WebhookVerification,
};
use crate::webhook::WebhookVerifier;

/// Identity service client.
///
/// Owns every piece of state it uses; two clients never share credentials,
/// breakers or listeners.
pub struct IdentityClient {
    config: ClientConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn CredentialStore>,
    tokens: Arc<TokenManager>,
    transport: AuthenticatingTransport,
    events: EventRegistry,
    breaker: Option<CircuitBreaker>,
    webhook: Option<WebhookVerifier>,
    monitor: Mutex<Option<RefreshMonitor>>,
}

impl IdentityClient {
    /// Create a new client with the default reqwest transport.
    pub fn new(config: ClientConfig) -> Result<Self, IdentityError> {
        let http = Arc::new(ReqwestHttpTransport::with_options(
            config.timeout,
            DEFAULT_MAX_RESPONSE_SIZE,
        )?);
        Self::with_components(config, http, Arc::new(SystemClock))
    }

    /// Create a client with custom transport and clock.
    pub fn with_components(
        config: ClientConfig,
        http: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, IdentityError> {
        let refresh_url = join_path(&config.base_url, &config.endpoints.refresh)?;
        let refresher = HttpTokenRefresher::new(http.clone(), clock.clone(), refresh_url.as_str())
            .with_timeout(config.timeout);

        let store = config.storage.build();
        let events = EventRegistry::new();
        let tokens = Arc::new(
            TokenManager::with_clock(
                TokenManagerConfig {
                    storage_key: config.storage_key.clone(),
                },
                store.clone(),
                Arc::new(refresher),
                clock.clone(),
            )
            .with_events(events.clone()),
        );

        let transport =
            AuthenticatingTransport::new(http, tokens.clone(), config.base_url.clone())
                .with_timeout(config.timeout);

        let breaker = config.circuit_breaker.clone().map(CircuitBreaker::new);

        let webhook = config.webhook_secret.as_ref().map(|secret| {
            WebhookVerifier::new(secret.expose_secret().clone())
                .with_tolerance(config.webhook_tolerance)
                .with_clock(clock.clone())
        });

        Ok(Self {
            config,
            clock,
            store,
            tokens,
            transport,
            events,
            breaker,
            webhook,
            monitor: Mutex::new(None),
        })
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn token_manager(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn credential_store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn transport(&self) -> &AuthenticatingTransport {
        &self.transport
    }

    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    /// Register a listener for credential lifecycle events.
    pub fn on_auth_event<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AuthEvent) + Send + Sync + 'static,
    {
        self.events.register(listener)
    }

    // ========== Sign-in ==========

    /// Sign in with email and password.
    ///
    /// An MFA challenge is returned as-is; credentials are only stored once
    /// the service reports the user as authenticated.
    pub async fn sign_in(
        &self,
        credentials: &SignInCredentials,
    ) -> Result<SignInOutcome, IdentityError> {
        let request = ApiRequest::post(&self.config.endpoints.sign_in)
            .json(credentials)?
            .skip_auth();
        let response: SignInResponse = self.transport.send_json(request).await?;
        self.complete_sign_in(response).await
    }

    /// Answer an MFA challenge.
    pub async fn complete_mfa(
        &self,
        challenge_id: impl Into<String>,
        code: impl Into<String>,
    ) -> Result<SignInOutcome, IdentityError> {
        let body = MfaVerification {
            challenge_id: challenge_id.into(),
            code: code.into(),
        };
        let request = ApiRequest::post(&self.config.endpoints.mfa_verify)
            .json(&body)?
            .skip_auth();
        let response: SignInResponse = self.transport.send_json(request).await?;
        self.complete_sign_in(response).await
    }

    /// Store credentials delivered to a sign-in callback.
    pub async fn handle_callback(
        &self,
        response: TokenResponse,
    ) -> Result<CredentialRecord, IdentityError> {
        let record = CredentialRecord::from_response(&response, self.clock.now_ms(), None)?;
        self.tokens.set_tokens(record.clone()).await?;
        info!("Signed in from callback");
        self.events.emit(&AuthEvent::SignedIn { user_id: None });
        Ok(record)
    }

    /// Sign out.
    ///
    /// The remote revocation is best-effort; local credentials are cleared
    /// whether or not it succeeds.
    pub async fn sign_out(&self) {
        match self.tokens.get_token_data().await {
            Ok(Some(record)) => {
                if let Err(error) = self.revoke_remote(&record).await {
                    warn!(error = %error, "Remote sign-out failed, clearing local credentials");
                }
            }
            Ok(None) => {}
            Err(error) => warn!(error = %error, "Unable to read credentials for sign-out"),
        }

        self.tokens.clear_tokens().await;
        info!("Signed out");
        self.events.emit(&AuthEvent::SignedOut);
    }

    /// Check if valid credentials are held.
    pub async fn is_authenticated(&self) -> Result<bool, IdentityError> {
        self.tokens.has_valid_tokens().await
    }

    /// Current access token, if any.
    pub async fn get_access_token(&self) -> Result<Option<String>, IdentityError> {
        self.tokens.get_access_token().await
    }

    /// Force a credential refresh, joining one already in flight.
    pub async fn refresh_tokens(&self) -> Result<CredentialRecord, IdentityError> {
        self.tokens.refresh().await
    }

    // ========== Requests ==========

    /// Send an authenticated request under the configured retry policy and
    /// circuit breaker.
    pub async fn request(&self, request: ApiRequest) -> Result<HttpResponse, IdentityError> {
        match &self.config.retry {
            Some(options) => with_retry(|| self.guarded_send(request.clone()), options).await,
            None => self.guarded_send(request).await,
        }
    }

    /// Send a request and deserialize the JSON response.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<T, IdentityError> {
        let response = self.request(request).await?;
        let body = if response.body.trim().is_empty() {
            "null"
        } else {
            response.body.as_str()
        };
        serde_json::from_str(body).map_err(|e| {
            ProtocolError::InvalidJson {
                message: e.to_string(),
            }
            .into()
        })
    }

    /// State of the request circuit breaker, if one is configured.
    pub fn circuit_state(&self) -> Option<CircuitBreakerState> {
        self.breaker.as_ref().map(|b| b.state())
    }

    // ========== Background refresh ==========

    /// Start refreshing credentials ahead of expiry. Idempotent.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_refresh_monitor(&self) {
        let mut monitor = self.monitor.lock();
        if monitor.as_ref().map_or(false, RefreshMonitor::is_running) {
            return;
        }
        *monitor = Some(RefreshMonitor::spawn(
            self.tokens.clone(),
            self.config.refresh_interval,
            self.config.refresh_threshold,
        ));
    }

    /// Stop the background refresh monitor.
    pub fn stop_refresh_monitor(&self) {
        self.monitor.lock().take();
    }

    pub fn is_refresh_monitor_running(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .map_or(false, RefreshMonitor::is_running)
    }

    // ========== Webhooks ==========

    pub fn webhook_verifier(&self) -> Option<&WebhookVerifier> {
        self.webhook.as_ref()
    }

    /// Verify an inbound webhook with the configured secret.
    pub fn verify_webhook(
        &self,
        headers: &HashMap<String, String>,
        body: &str,
    ) -> Result<WebhookVerification, IdentityError> {
        Ok(self.require_webhook()?.verify_request(headers, body))
    }

    /// Verify an inbound webhook and parse its event.
    pub fn parse_webhook_event(
        &self,
        headers: &HashMap<String, String>,
        body: &str,
    ) -> Result<WebhookEvent, IdentityError> {
        self.require_webhook()?.parse_event(headers, body)
    }

    fn require_webhook(&self) -> Result<&WebhookVerifier, IdentityError> {
        self.webhook.as_ref().ok_or_else(|| {
            ConfigurationError::MissingRequired {
                field: "webhook_secret".to_string(),
            }
            .into()
        })
    }

    async fn complete_sign_in(
        &self,
        response: SignInResponse,
    ) -> Result<SignInOutcome, IdentityError> {
        match response {
            SignInResponse::MfaChallenge {
                challenge_id,
                methods,
            } => {
                info!(challenge_id = %challenge_id, "Second factor required");
                Ok(SignInOutcome::MfaChallenge {
                    challenge_id,
                    methods,
                })
            }
            SignInResponse::Authenticated {
                user,
                access_token,
                refresh_token,
                expires_in,
            } => {
                let token_response = TokenResponse {
                    access_token,
                    refresh_token,
                    expires_in,
                };
                let tokens =
                    CredentialRecord::from_response(&token_response, self.clock.now_ms(), None)?;
                self.tokens.set_tokens(tokens.clone()).await?;

                info!(user_id = %user.id, "Signed in");
                self.events.emit(&AuthEvent::SignedIn {
                    user_id: Some(user.id.clone()),
                });
                Ok(SignInOutcome::Authenticated { user, tokens })
            }
        }
    }

    async fn revoke_remote(&self, record: &CredentialRecord) -> Result<(), IdentityError> {
        let request = ApiRequest::post(&self.config.endpoints.sign_out)
            .json(&RefreshTokenRequest {
                refresh_token: record.refresh_token.clone(),
            })?
            .header("authorization", record.authorization_header())
            .skip_auth();
        self.transport.send(request).await.map(|_| ())
    }

    /// One attempt through the circuit breaker. Only transient failures count
    /// against the breaker; other errors pass through untouched.
    async fn guarded_send(&self, request: ApiRequest) -> Result<HttpResponse, IdentityError> {
        let breaker = match &self.breaker {
            Some(breaker) => breaker,
            None => return self.transport.send(request).await,
        };

        breaker
            .call(move || async move {
                match self.transport.send(request).await {
                    Err(error) if is_retryable_error(&error) => Err(error),
                    other => Ok(other),
                }
            })
            .await?
    }
}

impl std::fmt::Debug for IdentityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityClient")
            .field("config", &self.config)
            .field("tokens", &self.tokens)
            .finish()
    }
}

/// Create a new identity client.
pub fn identity_client(config: ClientConfig) -> Result<IdentityClient, IdentityError> {
    IdentityClient::new(config)
}
