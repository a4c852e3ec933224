//! Integration tests using WireMock
//!
//! These tests drive the identity client against a mock HTTP server through
//! the real reqwest transport.

mod resilience;
mod session;
mod storage;

use identity_client::{client_config, ClientConfigBuilder, CredentialRecord, IdentityClient};
use serde_json::json;
use wiremock::{MockServer, ResponseTemplate};

/// Far-future expiry so stored credentials count as valid.
pub const FAR_FUTURE_MS: i64 = 4_102_444_800_000;

/// Helper to create a mock server
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

/// Helper to build a client against the mock server without retries.
pub fn test_client(server: &MockServer) -> IdentityClient {
    client_for(server, client_config().no_retry())
}

pub fn client_for(server: &MockServer, builder: ClientConfigBuilder) -> IdentityClient {
    let config = builder
        .base_url(server.uri())
        .build()
        .expect("valid test config");
    IdentityClient::new(config).expect("client builds")
}

/// Store an access token the server will consider stale.
pub async fn seed_tokens(client: &IdentityClient, access: &str, refresh: &str) {
    client
        .token_manager()
        .set_tokens(CredentialRecord::new(access, refresh, FAR_FUTURE_MS))
        .await
        .expect("tokens stored");
}

/// Helper to create a refresh endpoint response
pub fn token_response(access: &str, refresh: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": access,
        "refresh_token": refresh,
        "expires_in": 900
    }))
}

/// Helper to create error response templates
pub fn error_response(status: u16, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({ "message": message }))
}
