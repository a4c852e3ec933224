//! Integration tests for persisted credentials

use super::*;
use identity_client::ApiRequest;
use wiremock::matchers::{header, method, path};
use wiremock::Mock;

#[tokio::test]
async fn test_file_storage_survives_client_restart() {
    let server = setup_mock_server().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("authorization", "Bearer persisted"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u1"})))
        .expect(1)
        .mount(&server)
        .await;

    {
        let client = client_for(&server, client_config().no_retry().file_storage(dir.path()));
        seed_tokens(&client, "persisted", "rt-1").await;
    }

    let client = client_for(&server, client_config().no_retry().file_storage(dir.path()));
    assert!(client.is_authenticated().await.unwrap());

    let profile: serde_json::Value = client
        .request_json(ApiRequest::get("profile"))
        .await
        .unwrap();
    assert_eq!(profile["id"], "u1");
}

#[tokio::test]
async fn test_sign_out_removes_persisted_credentials() {
    let server = setup_mock_server().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/sign-out"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = client_for(&server, client_config().no_retry().file_storage(dir.path()));
    seed_tokens(&client, "persisted", "rt-1").await;
    client.sign_out().await;

    let reopened = client_for(&server, client_config().no_retry().file_storage(dir.path()));
    assert!(!reopened.is_authenticated().await.unwrap());
}

#[tokio::test]
async fn test_storage_keys_are_isolated() {
    let server = setup_mock_server().await;
    let dir = tempfile::tempdir().unwrap();

    let first = client_for(
        &server,
        client_config().no_retry().file_storage(dir.path()).storage_key("app.one"),
    );
    seed_tokens(&first, "one", "rt-1").await;

    let second = client_for(
        &server,
        client_config().no_retry().file_storage(dir.path()).storage_key("app.two"),
    );
    assert!(!second.is_authenticated().await.unwrap());
    assert!(first.is_authenticated().await.unwrap());
}
