//! Integration tests for the REST session client against a mock server

use confline_conference_core::{ClientConfig, ConferenceApi, DialRequest, HttpConferenceClient};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HttpConferenceClient {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    HttpConferenceClient::new(
        ClientConfig::new(server.uri(), "room")
            .with_display_name("Bridge Service")
            .with_renewal_interval(std::time::Duration::from_secs(3600)),
    )
}

async fn mount_token(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/conferences/room/request_token"))
        .and(body_partial_json(json!({ "display_name": "Bridge Service" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": token })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/conferences/room/refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn request_token_stores_credential() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1").await;

    let client = client_for(&server);
    let grant = client.request_token(None).await.unwrap();
    assert_eq!(grant.token, "tok-1");
    assert_eq!(client.token_store().current().as_deref(), Some("tok-1"));
    client.stop_renewal();
}

#[tokio::test]
async fn request_token_accepts_wrapped_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/conferences/room/request_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "result": { "token": "tok-2", "expires": "120" } })),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let grant = client.request_token(None).await.unwrap();
    assert_eq!(grant.token, "tok-2");
    client.stop_renewal();
}

#[tokio::test]
async fn request_token_rejection_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/conferences/room/request_token"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.request_token(Some("1234")).await.unwrap_err();
    assert!(!err.is_recoverable(), "4xx must not be retried blindly: {err}");
}

#[tokio::test]
async fn dial_sends_token_header_and_returns_ids() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-3").await;
    Mock::given(method("POST"))
        .and(path("/conferences/room/dial"))
        .and(header("token", "tok-3"))
        .and(body_partial_json(
            json!({ "destination": "ext@example.com", "protocol": "auto" }),
        ))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "result": ["p-1", "p-2"] })),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.request_token(None).await.unwrap();
    let ids = client.dial(DialRequest::new("ext@example.com")).await.unwrap();
    assert_eq!(ids, vec!["p-1", "p-2"]);
    client.stop_renewal();
}

#[tokio::test]
async fn dial_with_empty_result_returns_empty_list() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-4").await;
    Mock::given(method("POST"))
        .and(path("/conferences/room/dial"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [] })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.request_token(None).await.unwrap();
    let ids = client.dial(DialRequest::new("nowhere")).await.unwrap();
    assert!(ids.is_empty(), "no route created must surface as empty list");
    client.stop_renewal();
}

#[tokio::test]
async fn list_participants_returns_raw_payload() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-5").await;
    Mock::given(method("GET"))
        .and(path("/conferences/room/participants"))
        .and(header("token", "tok-5"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "result": [{ "uuid": "a", "protocol": "sip" }] })),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.request_token(None).await.unwrap();
    let raw = client.list_participants().await.unwrap();
    let entries = confline_conference_core::participant_entries(&raw);
    assert_eq!(entries.len(), 1);
    client.stop_renewal();
}

#[tokio::test]
async fn release_token_swallows_failure_and_clears_store() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-6").await;
    // No release_token mock mounted: the call will 404 and must be swallowed.

    let client = client_for(&server);
    client.request_token(None).await.unwrap();
    client.release_token().await;
    assert_eq!(client.token_store().current(), None);
}
