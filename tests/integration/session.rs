//! Integration tests for sign-in and credential refresh

use super::*;
use futures::future::join_all;
use identity_client::{
    ApiRequest, AuthEvent, IdentityError, SignInCredentials, SignInOutcome,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::Mock;

#[tokio::test]
async fn test_401_refreshes_once_and_replays() {
    let server = setup_mock_server().await;

    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(error_response(401, "token expired"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u1"})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({"refresh_token": "rt-1"})))
        .respond_with(token_response("fresh", "rt-2"))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    seed_tokens(&client, "stale", "rt-1").await;

    let profile: serde_json::Value = client
        .request_json(ApiRequest::get("profile"))
        .await
        .unwrap();

    assert_eq!(profile["id"], "u1");
    let record = client.token_manager().get_token_data().await.unwrap().unwrap();
    assert_eq!(record.access_token, "fresh");
    assert_eq!(record.refresh_token, "rt-2");
}

#[tokio::test]
async fn test_second_401_is_not_retried() {
    let server = setup_mock_server().await;

    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(error_response(401, "revoked"))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(token_response("fresh", "rt-2"))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    seed_tokens(&client, "stale", "rt-1").await;

    let error = client.request(ApiRequest::get("profile")).await.unwrap_err();
    assert!(matches!(error, IdentityError::Authentication { .. }));
}

#[tokio::test]
async fn test_failed_refresh_clears_session() {
    let server = setup_mock_server().await;

    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(error_response(401, "token expired"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(error_response(401, "refresh token revoked"))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    seed_tokens(&client, "stale", "rt-1").await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let _subscription = client.on_auth_event(move |event| {
        sink.lock().unwrap().push(event.name());
    });

    let error = client.request(ApiRequest::get("profile")).await.unwrap_err();

    match error {
        IdentityError::Authentication { message } => {
            assert!(message.starts_with("Session expired"))
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!client.is_authenticated().await.unwrap());
    assert_eq!(client.get_access_token().await.unwrap(), None);
    assert_eq!(*events.lock().unwrap(), vec!["refresh_failed"]);
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_call() {
    let server = setup_mock_server().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(token_response("fresh", "rt-2").set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    seed_tokens(&client, "stale", "rt-1").await;

    let results = join_all((0..10).map(|_| client.refresh_tokens())).await;

    for result in results {
        assert_eq!(result.unwrap().access_token, "fresh");
    }
    assert!(!client.token_manager().is_refreshing());
}

#[tokio::test]
async fn test_sign_in_with_mfa_then_sign_out() {
    let server = setup_mock_server().await;

    Mock::given(method("POST"))
        .and(path("/auth/sign-in"))
        .and(body_json(json!({"email": "a@example.com", "password": "pw"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "mfa_challenge",
            "challenge_id": "ch_1",
            "methods": ["totp"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/mfa/verify"))
        .and(body_json(json!({"challenge_id": "ch_1", "code": "123456"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "authenticated",
            "user": {"id": "u1", "email": "a@example.com"},
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_in": 900
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/sign-out"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let _subscription = client.on_auth_event(move |event: &AuthEvent| {
        sink.lock().unwrap().push(event.clone());
    });

    let outcome = client
        .sign_in(&SignInCredentials::new("a@example.com", "pw"))
        .await
        .unwrap();
    match outcome {
        SignInOutcome::MfaChallenge { challenge_id, methods } => {
            assert_eq!(challenge_id, "ch_1");
            assert_eq!(methods, vec!["totp".to_string()]);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!client.is_authenticated().await.unwrap());

    let outcome = client.complete_mfa("ch_1", "123456").await.unwrap();
    assert!(outcome.is_authenticated());
    assert_eq!(client.get_access_token().await.unwrap().as_deref(), Some("at-1"));

    client.sign_out().await;
    assert!(!client.is_authenticated().await.unwrap());

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            AuthEvent::SignedIn {
                user_id: Some("u1".to_string())
            },
            AuthEvent::SignedOut,
        ]
    );
}

#[tokio::test]
async fn test_invalid_credentials_store_nothing() {
    let server = setup_mock_server().await;

    Mock::given(method("POST"))
        .and(path("/auth/sign-in"))
        .respond_with(error_response(401, "invalid email or password"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(token_response("fresh", "rt-2"))
        .expect(0)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let error = client
        .sign_in(&SignInCredentials::new("a@example.com", "wrong"))
        .await
        .unwrap_err();

    match error {
        IdentityError::Authentication { message } => {
            assert_eq!(message, "invalid email or password")
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!client.is_authenticated().await.unwrap());
}
