#![allow(clippy::unwrap_used)]
// Integration tests for `DirectoryClient` using wiremock.

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hubsync_api::{DirectoryClient, Error, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, DirectoryClient) {
    let server = MockServer::start().await;
    let client =
        DirectoryClient::new(Url::parse(&server.uri()).unwrap(), &TransportConfig::default())
            .unwrap();
    (server, client)
}

fn token() -> SecretString {
    SecretString::from("tok".to_owned())
}

fn tds(start: usize, count: usize) -> Value {
    Value::Array(
        (start..start + count)
            .map(|i| json!({ "id": format!("urn:zone1:pub1:dev{i}:sensor"), "title": format!("Thing {i}") }))
            .collect(),
    )
}

async fn mount_page(server: &MockServer, offset: usize, limit: usize, body: Value) {
    Mock::given(method("GET"))
        .and(path("/things"))
        .and(query_param("offset", offset.to_string()))
        .and(query_param("limit", limit.to_string()))
        .and(header("authorization", "bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

// ── Listing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_pages_until_short_page() {
    let (server, client) = setup().await;
    mount_page(&server, 0, 100, tds(0, 100)).await;
    mount_page(&server, 100, 100, tds(100, 100)).await;
    mount_page(&server, 200, 100, tds(200, 37)).await;

    let listing = client.list_descriptions(&token()).await.unwrap();
    assert_eq!(listing.descriptions.len(), 237);
    assert!(!listing.truncated);

    let requests = server.received_requests().await.unwrap();
    let offsets: Vec<String> = requests
        .iter()
        .filter_map(|r| {
            r.url
                .query_pairs()
                .find(|(k, _)| k == "offset")
                .map(|(_, v)| v.into_owned())
        })
        .collect();
    assert_eq!(offsets, vec!["0", "100", "200"]);
}

#[tokio::test]
async fn test_list_applies_id_parts() {
    let (server, client) = setup().await;
    mount_page(&server, 0, 100, tds(0, 1)).await;

    let listing = client.list_descriptions(&token()).await.unwrap();
    let td = &listing.descriptions[0];
    assert_eq!(td.zone, "zone1");
    assert_eq!(td.publisher, "pub1");
    assert_eq!(td.device_id, "dev0");
    assert_eq!(td.device_type, "sensor");
}

#[tokio::test]
async fn test_empty_directory_is_one_request() {
    let (server, client) = setup().await;
    mount_page(&server, 0, 100, json!([])).await;

    let listing = client.list_descriptions(&token()).await.unwrap();
    assert!(listing.descriptions.is_empty());
}

#[tokio::test]
async fn test_page_limit_truncates() {
    let (server, client) = setup().await;
    let client = client.with_page_size(2).with_max_pages(3);

    // A server that always returns a full page.
    Mock::given(method("GET"))
        .and(path("/things"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tds(0, 2)))
        .mount(&server)
        .await;

    let listing = client.list_descriptions(&token()).await.unwrap();
    assert!(listing.truncated);
    assert_eq!(listing.descriptions.len(), 6);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_server_error_is_unauthorized_with_status() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/things"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = client.list_descriptions(&token()).await;
    assert!(
        matches!(result, Err(Error::Unauthorized { status: 500, .. })),
        "got: {result:?}"
    );
}

#[tokio::test]
async fn test_non_json_body_is_response_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/things"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let result = client.list_descriptions(&token()).await;
    assert!(matches!(result, Err(Error::Response { .. })), "got: {result:?}");
}

#[tokio::test]
async fn test_null_body_is_response_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/things"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&server)
        .await;

    let result = client.list_descriptions(&token()).await;
    assert!(matches!(result, Err(Error::Response { .. })), "got: {result:?}");
}

// ── Values ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_read_property_values() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/values/urn:dev1:sensor"))
        .and(query_param("offset", "0"))
        .and(query_param("limit", "1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "temperature": { "value": "21.5", "updated": "2024-03-01T10:00:00Z" },
            "name": { "value": "kitchen" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let values = client
        .read_property_values("urn:dev1:sensor", &token())
        .await
        .unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values["temperature"].value, json!("21.5"));
    assert!(values["temperature"].updated.is_some());
    assert!(values["name"].updated.is_none());
}

#[tokio::test]
async fn test_read_property_values_unauthorized() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/values/urn:dev1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client
        .read_property_values("urn:dev1", &token())
        .await
        .unwrap_err();
    assert!(err.is_auth_expired());
    assert_eq!(err.status(), Some(401));
}
