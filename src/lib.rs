//! Identity Client Integration Module
//!
//! Client-side credential lifecycle and resilience for an identity service.
//!
//! # Features
//!
//! - Credential storage (in-memory, file-backed, or caller-supplied)
//! - Token manager with coalesced refresh and lifecycle events
//! - Authenticated transport with a single refresh-and-retry on 401
//! - Background refresh ahead of expiry
//! - Retry with exponential backoff and jitter
//! - Circuit breaker
//! - HMAC webhook signature and replay-window verification
//!
//! # Example
//!
//! ```rust,ignore
//! use identity_client::{client_config, ApiRequest, IdentityClient, SignInCredentials};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = client_config()
//!         .base_url("https://id.example.com")
//!         .file_storage("/var/lib/myapp/credentials")
//!         .webhook_secret("whsec_...")
//!         .build()?;
//!
//!     let client = IdentityClient::new(config)?;
//!
//!     let outcome = client
//!         .sign_in(&SignInCredentials::new("user@example.com", "password"))
//!         .await?;
//!     println!("Authenticated: {}", outcome.is_authenticated());
//!
//!     client.start_refresh_monitor();
//!
//!     let profile: serde_json::Value = client.request_json(ApiRequest::get("me")).await?;
//!     println!("Profile: {}", profile);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: Credential, sign-in, webhook and configuration types
//! - `error`: Error hierarchy with HTTP status mapping
//! - `core`: HTTP transport, clock and the authenticating transport
//! - `token`: Credential storage, manager, refresher, monitor and events
//! - `resilience`: Retry with backoff and circuit breaker
//! - `webhook`: Webhook signing and verification
//! - `builders`: Fluent builder for configuration
//! - `client`: High-level identity client combining all functionality

pub mod builders;
pub mod client;
pub mod core;
pub mod error;
pub mod resilience;
pub mod token;
pub mod types;
pub mod webhook;

// Re-export main client
pub use client::{identity_client, IdentityClient};

// Re-export builders
pub use builders::{client_config, ClientConfigBuilder};

// Re-export errors
pub use error::{
    create_error_from_response, get_user_message, parse_error_response, ConfigurationError,
    IdentityError, IdentityResult, NetworkError, ProtocolError, StorageError, TokenError,
    WebhookError,
};

// Re-export types
pub use types::{
    // Config
    ClientConfig, EndpointConfig,
    // Token
    CredentialRecord, RefreshTokenRequest, TokenResponse,
    // Auth
    MfaVerification, SignInCredentials, SignInOutcome, SignInResponse, User,
    // Webhook
    WebhookEnvelope, WebhookEvent, WebhookVerification,
};

// Re-export core components
pub use core::{
    // Transport
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, MockHttpTransport,
    ReqwestHttpTransport,
    // Clock
    Clock, MockClock, SystemClock,
    // Authenticating transport
    ApiRequest, AuthenticatingTransport,
};

// Re-export token management
pub use token::{
    // Storage
    CredentialStore, FileCredentialStore, InMemoryCredentialStore, MockCredentialStore,
    StorageKind,
    // Manager
    TokenManager, TokenManagerConfig,
    // Refresher
    HttpTokenRefresher, MockTokenRefresher, TokenRefresher,
    // Monitor
    RefreshMonitor,
    // Events
    AuthEvent, EventRegistry, Subscription,
};

// Re-export resilience
pub use resilience::{
    // Retry
    calculate_delay, with_retry, RetryExecutor, RetryOptions, RetryStats,
    // Circuit Breaker
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerState,
    CircuitBreakerStats, CircuitState,
};

// Re-export webhook verification
pub use webhook::{
    generate_signature, timing_safe_equal, verify_signature, verify_timestamp, verify_webhook,
    SignatureAlgorithm, WebhookVerifier, WebhookVerifyOptions,
};
