//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::net::TcpListener;
use std::panic::Location;
use std::time::Duration;

use newswatch_core::{FetchClient, FetchConfig, RetryPolicy};
use wiremock::MockServer;

#[must_use]
pub fn socket_tests_required() -> bool {
    std::env::var("NEWSWATCH_REQUIRE_SOCKET_TESTS")
        .ok()
        .is_some_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

#[track_caller]
#[must_use]
pub fn should_skip_socket_bound_test() -> bool {
    if TcpListener::bind("127.0.0.1:0").is_ok() {
        return false;
    }

    let location = Location::caller();
    let message = format!(
        "[socket-bound-test] cannot bind localhost socket at {}:{}; wiremock-based test cannot run in this environment",
        location.file(),
        location.line()
    );
    if socket_tests_required() {
        panic!("{message}. Set NEWSWATCH_REQUIRE_SOCKET_TESTS=0 to allow local skip behavior.");
    }

    eprintln!(
        "{message}. Skipping test. Set NEWSWATCH_REQUIRE_SOCKET_TESTS=1 to fail-fast instead."
    );
    true
}

pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    if should_skip_socket_bound_test() {
        None
    } else {
        Some(MockServer::start().await)
    }
}

/// Retry policy with millisecond delays and no jitter.
#[must_use]
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(10),
        Duration::from_millis(50),
        2.0,
    )
    .with_max_jitter(Duration::ZERO)
}

pub const TEST_USER_AGENT: &str = "newswatch-tests/1.0 (qa@newswatch.test)";

/// Session without throttling and with fast retries.
#[must_use]
pub fn fast_client(max_attempts: u32) -> FetchClient {
    FetchClient::new(FetchConfig {
        user_agent: TEST_USER_AGENT.to_string(),
        min_request_interval: Duration::ZERO,
        retry: fast_retry(max_attempts),
        ..FetchConfig::default()
    })
    .unwrap()
}
