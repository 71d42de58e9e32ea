//! Integration tests for the fetch layer against a mock HTTP server.

use std::time::{Duration, Instant};

use newswatch_core::fetch::{
    ACCEPT_FEED, FetchClient, FetchConfig, FetchError, FetchOutcome, Validators,
};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::{TEST_USER_AGENT, fast_client, fast_retry, start_mock_server_or_skip};

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

#[tokio::test]
async fn test_transient_503_is_retried_until_success() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let client = fast_client(3);
    let body = client
        .get_text(&format!("{}/feed", mock_server.uri()), ACCEPT_FEED)
        .await
        .unwrap();

    assert_eq!(body, "ok");
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_retries_stop_at_attempt_ceiling() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&mock_server)
        .await;

    let client = fast_client(3);
    let err = client
        .get_text(&format!("{}/down", mock_server.uri()), ACCEPT_FEED)
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(502));
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = fast_client(5);
    let err = client
        .get_text(&format!("{}/missing", mock_server.uri()), ACCEPT_FEED)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
}

#[tokio::test]
async fn test_post_is_never_retried() {
    let mock_server = require_mock_server!();

    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = fast_client(5);
    let err = client
        .post_json(&format!("{}/search", mock_server.uri()), &json!({"q": "acme"}))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(503));
}

#[tokio::test]
async fn test_retry_after_seconds_is_honored() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("later"))
        .mount(&mock_server)
        .await;

    let client = fast_client(3);
    let started = Instant::now();
    let body = client
        .get_text(&format!("{}/limited", mock_server.uri()), ACCEPT_FEED)
        .await
        .unwrap();

    assert_eq!(body, "later");
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_conditional_get_replays_validators() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .insert_header("Last-Modified", "Tue, 06 Oct 2026 12:00:00 GMT")
                .set_body_string("<rss/>"),
        )
        .mount(&mock_server)
        .await;

    let client = fast_client(1);
    let url = format!("{}/feed.xml", mock_server.uri());
    let mut validators = Validators::default();

    let first = client
        .conditional_get(&url, ACCEPT_FEED, &mut validators)
        .await
        .unwrap();
    assert!(matches!(first, FetchOutcome::Fresh { ref body, .. } if body == "<rss/>"));
    assert_eq!(validators.etag.as_deref(), Some("\"v1\""));
    assert_eq!(
        validators.last_modified.as_deref(),
        Some("Tue, 06 Oct 2026 12:00:00 GMT")
    );

    let second = client
        .conditional_get(&url, ACCEPT_FEED, &mut validators)
        .await
        .unwrap();
    assert_eq!(second, FetchOutcome::NotModified);
    assert_eq!(validators.etag.as_deref(), Some("\"v1\""));

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].headers.contains_key("if-modified-since"));
}

#[tokio::test]
async fn test_user_agent_and_accept_are_sent() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(header("user-agent", TEST_USER_AGENT))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": []})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = fast_client(1);
    let document = client
        .get_json(&format!("{}/api", mock_server.uri()))
        .await
        .unwrap();
    assert_eq!(document, json!({"rows": []}));
}

#[tokio::test]
async fn test_timeouts_are_retried_then_surfaced() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;

    let client = FetchClient::new(FetchConfig {
        user_agent: TEST_USER_AGENT.to_string(),
        min_request_interval: Duration::ZERO,
        request_timeout: Duration::from_millis(200),
        retry: fast_retry(2),
        ..FetchConfig::default()
    })
    .unwrap();

    let err = client
        .get_text(&format!("{}/slow", mock_server.uri()), ACCEPT_FEED)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Timeout { .. }));
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_throttle_spaces_requests() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let client = FetchClient::new(FetchConfig {
        user_agent: TEST_USER_AGENT.to_string(),
        min_request_interval: Duration::from_millis(150),
        retry: fast_retry(1),
        ..FetchConfig::default()
    })
    .unwrap();

    let url = format!("{}/ping", mock_server.uri());
    let started = Instant::now();
    for _ in 0..3 {
        client.get_text(&url, ACCEPT_FEED).await.unwrap();
    }
    assert!(started.elapsed() >= Duration::from_millis(300));
}
