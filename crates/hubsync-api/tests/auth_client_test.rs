#![allow(clippy::unwrap_used)]
// Integration tests for `AuthClient` using wiremock.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hubsync_api::{AuthClient, Error, SessionTokens, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, AuthClient, SessionTokens) {
    let server = MockServer::start().await;
    let tokens = SessionTokens::new();
    let client = AuthClient::new(
        "acct-1",
        Url::parse(&server.uri()).unwrap(),
        &TransportConfig::default(),
        tokens.clone(),
    )
    .unwrap();
    (server, client, tokens)
}

fn secret(s: &str) -> SecretString {
    SecretString::from(s.to_owned())
}

fn jwt_expiring_in(secs: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + secs;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("{header}.{claims}.sig")
}

// ── Login ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_success_stores_token() {
    let (server, client, tokens) = setup().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({
            "login": "alice",
            "password": "hunter2",
            "rememberMe": true
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "tok-1" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let token = client.login("alice", &secret("hunter2"), true).await.unwrap();
    assert_eq!(token.expose_secret(), "tok-1");
    assert_eq!(client.access_token().unwrap().expose_secret(), "tok-1");
    assert_eq!(tokens.get("acct-1").unwrap().expose_secret(), "tok-1");
}

#[tokio::test]
async fn test_login_401_is_unauthorized() {
    let (server, client, _) = setup().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = client.login("alice", &secret("wrong"), false).await;
    assert!(
        matches!(result, Err(Error::Unauthorized { status: 401, .. })),
        "expected Unauthorized, got: {result:?}"
    );
}

#[tokio::test]
async fn test_failed_login_keeps_previous_token() {
    let (server, client, tokens) = setup().await;
    tokens.insert("acct-1", secret("old-token"));

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = client.login("alice", &secret("pw"), false).await;
    assert!(matches!(result, Err(Error::Unauthorized { status: 500, .. })));
    assert_eq!(client.access_token().unwrap().expose_secret(), "old-token");
}

#[tokio::test]
async fn test_login_without_token_is_response_error() {
    let (server, client, _) = setup().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "user": "alice" })))
        .mount(&server)
        .await;

    let result = client.login("alice", &secret("pw"), false).await;
    assert!(matches!(result, Err(Error::Response { .. })), "got: {result:?}");
    assert!(client.access_token().is_none());
}

// ── Refresh ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_replaces_token() {
    let (server, client, tokens) = setup().await;
    tokens.insert("acct-1", secret("stale"));

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "fresh" })),
        )
        .mount(&server)
        .await;

    let token = client.refresh().await.unwrap();
    assert_eq!(token.expose_secret(), "fresh");
    assert_eq!(client.access_token().unwrap().expose_secret(), "fresh");
}

#[tokio::test]
async fn test_refresh_without_cookie_fails() {
    let (server, client, _) = setup().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = client.refresh().await.unwrap_err();
    assert!(err.is_auth_expired(), "got: {err:?}");
}

// ── Session restore / expiry ────────────────────────────────────────

#[tokio::test]
async fn test_new_client_restores_cached_token() {
    let (server, _client, tokens) = setup().await;
    tokens.insert("acct-1", secret("cached"));

    let again = AuthClient::new(
        "acct-1",
        Url::parse(&server.uri()).unwrap(),
        &TransportConfig::default(),
        tokens.clone(),
    )
    .unwrap();
    assert_eq!(again.access_token().unwrap().expose_secret(), "cached");

    let other = AuthClient::new(
        "acct-2",
        Url::parse(&server.uri()).unwrap(),
        &TransportConfig::default(),
        tokens,
    )
    .unwrap();
    assert!(other.access_token().is_none());
}

#[tokio::test]
async fn test_remaining_validity() {
    let (server, client, _) = setup().await;
    assert_eq!(client.remaining_validity_secs(), 0);

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "accessToken": jwt_expiring_in(3600) })),
        )
        .mount(&server)
        .await;

    client.login("alice", &secret("pw"), false).await.unwrap();
    let remaining = client.remaining_validity_secs();
    assert!(
        (3590..=3600).contains(&remaining),
        "unexpected remaining validity {remaining}"
    );

    client.clear();
    assert_eq!(client.remaining_validity_secs(), 0);
}
