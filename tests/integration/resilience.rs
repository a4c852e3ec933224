//! Integration tests for retry and circuit breaking

use super::*;
use identity_client::{
    ApiRequest, CircuitBreakerConfig, CircuitState, IdentityError, NetworkError, RetryOptions,
};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::Mock;

fn fast_retry() -> RetryOptions<IdentityError> {
    RetryOptions::transient()
        .max_attempts(3)
        .initial_delay(Duration::from_millis(5))
        .max_delay(Duration::from_millis(20))
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = setup_mock_server().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(error_response(503, "unavailable"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, client_config().retry(fast_retry()));
    let body: serde_json::Value = client.request_json(ApiRequest::get("status")).await.unwrap();

    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn test_retries_exhausted_returns_last_error() {
    let server = setup_mock_server().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(error_response(502, "bad gateway"))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server, client_config().retry(fast_retry()));
    let error = client.request(ApiRequest::get("status")).await.unwrap_err();

    assert!(matches!(error, IdentityError::Server { status: 502, .. }));
}

#[tokio::test]
async fn test_validation_error_is_not_retried() {
    let server = setup_mock_server().await;

    Mock::given(method("POST"))
        .and(path("/users"))
        .respond_with(error_response(400, "email is required"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, client_config().retry(fast_retry()));
    let error = client.request(ApiRequest::post("users")).await.unwrap_err();

    match error {
        IdentityError::Validation { message } => assert_eq!(message, "email is required"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_breaker_opens_and_fails_fast() {
    let server = setup_mock_server().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(error_response(503, "unavailable"))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(
        &server,
        client_config().no_retry().circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_secs(60),
            call_timeout: None,
        }),
    );

    for _ in 0..2 {
        assert!(client.request(ApiRequest::get("status")).await.is_err());
    }

    let error = client.request(ApiRequest::get("status")).await.unwrap_err();
    assert!(matches!(error, IdentityError::Network(NetworkError::CircuitOpen)));
    assert_eq!(client.circuit_state().unwrap().status, CircuitState::Open);
}

#[tokio::test]
async fn test_breaker_recovers_after_reset_timeout() {
    let server = setup_mock_server().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(error_response(503, "unavailable"))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client_for(
        &server,
        client_config().no_retry().circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(50),
            call_timeout: None,
        }),
    );

    assert!(client.request(ApiRequest::get("status")).await.is_err());
    assert_eq!(client.circuit_state().unwrap().status, CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(client.request(ApiRequest::get("status")).await.is_ok());
    let state = client.circuit_state().unwrap();
    assert_eq!(state.status, CircuitState::Closed);
    assert_eq!(state.consecutive_failures, 0);
}

#[tokio::test]
async fn test_rate_limit_reports_retry_after() {
    let server = setup_mock_server().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(error_response(429, "slow down").insert_header("retry-after", "7"))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let error = client.request(ApiRequest::get("status")).await.unwrap_err();

    assert_eq!(error.retry_after(), Some(Duration::from_secs(7)));
}
