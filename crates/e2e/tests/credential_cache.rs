//! Credential cache against a mock token endpoint

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use webtests_e2e::config::ApiSettings;
use webtests_e2e::{CredentialCache, HarnessError};

fn settings(server: &MockServer) -> ApiSettings {
    ApiSettings {
        base_url: server.uri(),
        token_url: format!("{}/connect/token", server.uri()),
        client_id: "suite-client".to_string(),
        client_secret: "suite-secret".to_string(),
        scope: "books".to_string(),
        grant_type: "client_credentials".to_string(),
        token_safety_margin_secs: 300,
        request_timeout_ms: 5_000,
    }
}

fn token_body(token: &str, expires_in: u64) -> serde_json::Value {
    json!({
        "access_token": token,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "scope": "books",
    })
}

#[tokio::test]
async fn reuses_token_within_validity_window() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .and(body_string_contains("client_id=suite-client"))
        .and(body_string_contains("client_secret=suite-secret"))
        .and(body_string_contains("scope=books"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("abc", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let cache = CredentialCache::new(settings(&server)).unwrap();
    for _ in 0..5 {
        assert_eq!(cache.get_token().await.unwrap(), "abc");
    }

    let cached = cache.current().await.expect("credential cached");
    assert!(cached.is_valid(Duration::from_secs(300)));
    server.verify().await;
}

#[tokio::test]
async fn stale_token_triggers_exactly_one_new_exchange() {
    let server = MockServer::start().await;
    // 120 s of lifetime is inside the 300 s safety margin: stale on arrival
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("short", 120)))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("long", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let cache = CredentialCache::new(settings(&server)).unwrap();
    assert_eq!(cache.get_token().await.unwrap(), "short");
    assert_eq!(cache.get_token().await.unwrap(), "long");
    assert_eq!(cache.get_token().await.unwrap(), "long");
    server.verify().await;
}

#[tokio::test]
async fn server_error_is_authentication_error_and_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("recovered", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let cache = CredentialCache::new(settings(&server)).unwrap();

    match cache.get_token().await {
        Err(HarnessError::Authentication(msg)) => assert!(msg.contains("500")),
        other => panic!("expected authentication error, got {:?}", other),
    }
    assert!(cache.current().await.is_none());

    assert_eq!(cache.get_token().await.unwrap(), "recovered");
    server.verify().await;
}

#[tokio::test]
async fn malformed_body_is_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "wrong-shape" })))
        .mount(&server)
        .await;

    let cache = CredentialCache::new(settings(&server)).unwrap();
    assert!(matches!(cache.get_token().await, Err(HarnessError::Authentication(_))));
    assert!(cache.current().await.is_none());
}

#[tokio::test]
async fn empty_access_token_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("", 3600)))
        .mount(&server)
        .await;

    let cache = CredentialCache::new(settings(&server)).unwrap();
    assert!(matches!(cache.get_token().await, Err(HarnessError::Authentication(_))));
}

#[tokio::test]
async fn overlapping_requests_share_one_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("shared", 3600))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(CredentialCache::new(settings(&server)).unwrap());
    let mut handles = Vec::new();
    for _ in 0..4 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { cache.get_token().await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "shared");
    }
    server.verify().await;
}

#[tokio::test]
async fn invalidate_forces_new_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("again", 3600)))
        .expect(2)
        .mount(&server)
        .await;

    let cache = CredentialCache::new(settings(&server)).unwrap();
    cache.get_token().await.unwrap();
    cache.invalidate().await;
    cache.get_token().await.unwrap();
    server.verify().await;
}

#[tokio::test]
async fn out_of_range_lifetime_is_authentication_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "abc",
            "expires_in": 9_000_000_000_000u64,
        })))
        .expect(2)
        .mount(&server)
        .await;

    let cache = CredentialCache::new(settings(&server)).unwrap();
    for _ in 0..2 {
        match cache.get_token().await {
            Err(HarnessError::Authentication(msg)) => assert!(msg.contains("out of range"), "{}", msg),
            other => panic!("expected authentication error, got {:?}", other),
        }
    }
    assert!(cache.current().await.is_none());
    server.verify().await;
}
