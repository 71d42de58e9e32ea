//! Session HTTP client: throttling, retries and conditional GETs.
//!
//! One [`FetchClient`] is built per source adapter. Clones share the
//! connection pool and the throttle gate.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::conditional::Validators;
use super::error::FetchError;
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::throttle::{Throttle, parse_retry_after};
use crate::user_agent;

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Default TCP connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default minimum spacing between requests of one session.
const DEFAULT_MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(250);

/// `Accept` header sent when fetching Atom/RSS feeds.
pub const ACCEPT_FEED: &str =
    "application/atom+xml, application/rss+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.5";

/// `Accept` header sent when fetching HTML pages.
pub const ACCEPT_HTML: &str = "text/html, application/xhtml+xml;q=0.9, */*;q=0.5";

/// `Accept` header sent when calling JSON APIs.
pub const ACCEPT_JSON: &str = "application/json";

/// Settings for a [`FetchClient`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User-Agent sent on every request.
    pub user_agent: String,
    /// Minimum spacing between two requests of the session.
    pub min_request_interval: Duration,
    /// Whole-request timeout.
    pub request_timeout: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Retry policy for idempotent requests.
    pub retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: user_agent::default_user_agent(),
            min_request_interval: DEFAULT_MIN_REQUEST_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of a conditional GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The server answered 304; nothing changed since the last fetch.
    NotModified,
    /// A new representation was returned.
    Fresh {
        /// Response body.
        body: String,
        /// `Content-Type` of the response, if given.
        content_type: Option<String>,
    },
}

/// HTTP session with a shared throttle and retry policy.
///
/// # Example
///
/// ```no_run
/// use newswatch_core::fetch::{FetchClient, FetchConfig, FetchOutcome, Validators, ACCEPT_FEED};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = FetchClient::new(FetchConfig::default())?;
/// let mut validators = Validators::default();
///
/// match client.conditional_get("https://example.com/feed.xml", ACCEPT_FEED, &mut validators).await? {
///     FetchOutcome::NotModified => println!("unchanged"),
///     FetchOutcome::Fresh { body, .. } => println!("{} bytes", body.len()),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
    throttle: Arc<Throttle>,
    retry: RetryPolicy,
    user_agent: String,
}

impl FetchClient {
    /// Builds a session from `config`.
    ///
    /// Warns once per process if the User-Agent is still a placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        user_agent::warn_if_placeholder(&config.user_agent);

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .gzip(true)
            .build()
            .map_err(|source| FetchError::ClientBuild { source })?;

        Ok(Self {
            client,
            throttle: Arc::new(Throttle::new(config.min_request_interval)),
            retry: config.retry,
            user_agent: config.user_agent,
        })
    }

    /// Returns the User-Agent this session sends.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Returns the session's throttle gate.
    #[must_use]
    pub fn throttle(&self) -> &Arc<Throttle> {
        &self.throttle
    }

    /// Returns the session's retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// GETs `url` and returns the body as text.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] once retries are exhausted or on a permanent
    /// failure.
    #[instrument(skip(self))]
    pub async fn get_text(&self, url: &str, accept: &str) -> Result<String, FetchError> {
        self.get_text_within(url, accept, None).await
    }

    /// Like [`get_text`](Self::get_text) with a per-request timeout override.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] once retries are exhausted or on a permanent
    /// failure.
    #[instrument(skip(self))]
    pub async fn get_text_within(
        &self,
        url: &str,
        accept: &str,
        timeout: Option<Duration>,
    ) -> Result<String, FetchError> {
        let response = self
            .send(Method::GET, url, accept_headers(accept), None, timeout)
            .await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Err(FetchError::http_status(url, StatusCode::NOT_MODIFIED.as_u16()));
        }
        response
            .text()
            .await
            .map_err(|source| FetchError::decode(url, source))
    }

    /// GETs `url` and decodes a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] once retries are exhausted, on a permanent
    /// failure, or if the body is not JSON.
    #[instrument(skip(self))]
    pub async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let response = self
            .send(Method::GET, url, accept_headers(ACCEPT_JSON), None, None)
            .await?;
        response
            .json::<Value>()
            .await
            .map_err(|source| FetchError::decode(url, source))
    }

    /// POSTs a JSON body and decodes the JSON reply. Never retried.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on any failure, or if the reply is not JSON.
    #[instrument(skip(self, body))]
    pub async fn post_json(&self, url: &str, body: &Value) -> Result<Value, FetchError> {
        let response = self
            .send(
                Method::POST,
                url,
                accept_headers(ACCEPT_JSON),
                Some(body),
                None,
            )
            .await?;
        response
            .json::<Value>()
            .await
            .map_err(|source| FetchError::decode(url, source))
    }

    /// GETs `url` with the stored validators replayed as conditional headers.
    ///
    /// A 304 yields [`FetchOutcome::NotModified`] and leaves `validators`
    /// untouched; a fresh response replaces them.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] once retries are exhausted or on a permanent
    /// failure.
    #[instrument(skip(self, validators))]
    pub async fn conditional_get(
        &self,
        url: &str,
        accept: &str,
        validators: &mut Validators,
    ) -> Result<FetchOutcome, FetchError> {
        let mut headers = accept_headers(accept);
        validators.apply(&mut headers);

        let response = self.send(Method::GET, url, headers, None, None).await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            debug!(url, "not modified");
            return Ok(FetchOutcome::NotModified);
        }

        validators.update_from(response.headers());
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|source| FetchError::decode(url, source))?;

        Ok(FetchOutcome::Fresh { body, content_type })
    }

    /// Sends one logical request, retrying transient failures.
    ///
    /// Success and `304 Not Modified` are returned as responses; every other
    /// status becomes [`FetchError::HttpStatus`].
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Response, FetchError> {
        if url::Url::parse(url).is_err() {
            return Err(FetchError::invalid_url(url));
        }

        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(attempt, %method, url, "sending request");

            self.throttle.acquire(url).await;

            let mut request = self
                .client
                .request(method.clone(), url)
                .headers(headers.clone());
            if let Some(body) = body {
                request = request.json(body);
            }
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }

            let error = match request.send().await {
                Ok(response) => match check_status(url, response) {
                    Ok(response) => return Ok(response),
                    Err(error) => error,
                },
                Err(source) => FetchError::from_send(url, source),
            };

            let failure_type = classify_error(&error);
            let retry_after_delay = self.retry_after_delay(&error, failure_type).await;

            match self.retry.should_retry(&method, failure_type, attempt) {
                RetryDecision::Retry {
                    delay: backoff_delay,
                    attempt: next_attempt,
                } => {
                    let delay = retry_after_delay.unwrap_or(backoff_delay);

                    info!(
                        url,
                        attempt = next_attempt,
                        max_attempts = self.retry.max_attempts(),
                        delay_ms = delay.as_millis(),
                        using_retry_after = retry_after_delay.is_some(),
                        error = %error,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url, %reason, "not retrying request");
                    return Err(error);
                }
            }
        }
    }

    /// Parses a Retry-After header from a retryable status and records it on
    /// the throttle so every request of the session honors it.
    async fn retry_after_delay(
        &self,
        error: &FetchError,
        failure_type: FailureType,
    ) -> Option<Duration> {
        if failure_type == FailureType::Permanent {
            return None;
        }
        let FetchError::HttpStatus {
            retry_after: Some(value),
            ..
        } = error
        else {
            return None;
        };
        let delay = parse_retry_after(value)?;
        self.throttle.defer(delay).await;
        Some(delay)
    }
}

fn accept_headers(accept: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(accept) {
        headers.insert(ACCEPT, value);
    }
    headers
}

fn check_status(url: &str, response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() || status == StatusCode::NOT_MODIFIED {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(std::string::ToString::to_string);
    Err(FetchError::http_status_with_retry_after(
        url,
        status.as_u16(),
        retry_after,
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_uses_placeholder_agent() {
        let config = FetchConfig::default();
        assert!(user_agent::is_placeholder(&config.user_agent));
        assert_eq!(config.min_request_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_client_exposes_configuration() {
        let client = FetchClient::new(FetchConfig {
            user_agent: "TestAgent/1.0 (qa@acme.io)".to_string(),
            min_request_interval: Duration::from_millis(50),
            retry: RetryPolicy::with_max_attempts(2),
            ..FetchConfig::default()
        })
        .unwrap();

        assert_eq!(client.user_agent(), "TestAgent/1.0 (qa@acme.io)");
        assert_eq!(client.throttle().min_interval(), Duration::from_millis(50));
        assert_eq!(client.retry_policy().max_attempts(), 2);
    }

    #[test]
    fn test_clones_share_throttle() {
        let client = FetchClient::new(FetchConfig::default()).unwrap();
        let clone = client.clone();
        assert!(Arc::ptr_eq(client.throttle(), clone.throttle()));
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_without_request() {
        let client = FetchClient::new(FetchConfig::default()).unwrap();
        let result = client.get_text("not a url", ACCEPT_HTML).await;
        assert!(matches!(result, Err(FetchError::InvalidUrl { .. })));
    }

    #[test]
    fn test_accept_headers() {
        let headers = accept_headers(ACCEPT_FEED);
        assert_eq!(headers.get(ACCEPT).unwrap(), ACCEPT_FEED);
    }
}
