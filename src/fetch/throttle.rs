//! Minimum-interval request gate for a fetch session.
//!
//! A [`Throttle`] is shared by every request issued through one
//! [`FetchClient`](super::FetchClient). No two requests pass the gate closer
//! together than the configured interval; callers sleep rather than being
//! rejected.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use newswatch_core::fetch::Throttle;
//!
//! # async fn example() {
//! let throttle = Throttle::new(Duration::from_millis(250));
//!
//! // First request proceeds immediately
//! throttle.acquire("https://example.com/feed.xml").await;
//!
//! // Second request waits until 250ms have passed since the first
//! throttle.acquire("https://example.com/article/1").await;
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Warning threshold for cumulative delay (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Minimum-interval gate shared across tasks of one session.
///
/// `Throttle` is `Send + Sync`; wrap it in `Arc` to share it.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,

    /// Timing state, locked for the whole check-sleep-update sequence so
    /// concurrent callers are serialized through the gate.
    state: Mutex<GateState>,

    /// Total delay applied by this gate, in milliseconds.
    cumulative_delay_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct GateState {
    /// `None` until the first request passes.
    last_request: Option<Instant>,
    /// Server-mandated earliest time for the next request.
    not_before: Option<Instant>,
}

impl Throttle {
    /// Creates a throttle enforcing `min_interval` between requests.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: Mutex::new(GateState::default()),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Creates a throttle that never delays (server deferrals still apply).
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns the configured minimum interval.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Returns the total delay this gate has imposed so far.
    #[must_use]
    pub fn cumulative_delay(&self) -> Duration {
        Duration::from_millis(self.cumulative_delay_ms.load(Ordering::SeqCst))
    }

    /// Waits until a request may be sent, then records it.
    ///
    /// `url` is used only for logging.
    #[instrument(skip(self), fields(host = %host_of(url)))]
    pub async fn acquire(&self, url: &str) {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let mut ready_at = state
            .last_request
            .map_or(now, |last| last + self.min_interval);
        if let Some(not_before) = state.not_before
            && not_before > ready_at
        {
            ready_at = not_before;
        }

        if ready_at > now {
            let delay = ready_at - now;
            let cumulative = self.add_cumulative_delay(delay);

            debug!(
                delay_ms = delay.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "applying request throttle"
            );

            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
                && cumulative - delay < CUMULATIVE_DELAY_WARNING_THRESHOLD
            {
                warn!(
                    cumulative_delay_secs = cumulative.as_secs(),
                    "excessive throttling - consider reducing request volume"
                );
            }

            tokio::time::sleep(delay).await;
        }

        state.last_request = Some(Instant::now());
        state.not_before = None;
    }

    /// Records a server-mandated delay (from a Retry-After header); the next
    /// request will not pass the gate before it elapses.
    #[instrument(skip(self))]
    pub async fn defer(&self, delay: Duration) {
        let mut state = self.state.lock().await;
        let until = Instant::now() + delay;
        if state.not_before.is_none_or(|current| current < until) {
            state.not_before = Some(until);
        }
        debug!(delay_ms = delay.as_millis(), "recorded server rate limit");
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds (`Retry-After: 120`) and HTTP-dates
/// (`Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`). Returns `None` if the value
/// cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use newswatch_core::fetch::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    let Ok(datetime) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };

    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) if duration > MAX_RETRY_AFTER => {
            warn!(
                delay_secs = duration.as_secs(),
                "Retry-After date exceeds maximum, capping at 1 hour"
            );
            Some(MAX_RETRY_AFTER)
        }
        Ok(duration) => Some(duration),
        Err(_) => Some(Duration::ZERO),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_request_no_delay() {
        let throttle = Throttle::new(Duration::from_secs(1));
        let start = Instant::now();

        throttle.acquire("https://example.com/feed").await;

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_requests_are_spaced() {
        let throttle = Throttle::new(Duration::from_secs(1));
        let start = Instant::now();

        throttle.acquire("https://example.com/1").await;
        throttle.acquire("https://other.com/2").await;
        assert!(start.elapsed() >= Duration::from_secs(1));

        throttle.acquire("https://example.com/3").await;
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(throttle.cumulative_delay(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_throttle_never_waits() {
        let throttle = Throttle::disabled();
        let start = Instant::now();

        for _ in 0..5 {
            throttle.acquire("https://example.com").await;
        }

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_time_counts_toward_interval() {
        let throttle = Throttle::new(Duration::from_secs(1));
        throttle.acquire("https://example.com/1").await;

        tokio::time::sleep(Duration::from_millis(700)).await;
        let start = Instant::now();
        throttle.acquire("https://example.com/2").await;

        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(300));
        assert!(waited < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_defer_pushes_next_request_back() {
        let throttle = Throttle::disabled();
        throttle.acquire("https://example.com/1").await;
        throttle.defer(Duration::from_secs(5)).await;

        let start = Instant::now();
        throttle.acquire("https://example.com/2").await;
        assert!(start.elapsed() >= Duration::from_secs(5));

        // Deferral is consumed by the request that honored it.
        let start = Instant::now();
        throttle.acquire("https://example.com/3").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("  120  "), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after(""), None);
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("7200"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_retry_after_http_date_past() {
        let past_date = "Wed, 01 Jan 2020 00:00:00 GMT";
        assert_eq!(parse_retry_after(past_date), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_http_date_future() {
        let future_time = std::time::SystemTime::now() + Duration::from_secs(60);
        let future_date = httpdate::fmt_http_date(future_time);

        let duration = parse_retry_after(&future_date).unwrap();
        assert!(
            duration >= Duration::from_secs(55) && duration <= Duration::from_secs(65),
            "Duration should be ~60s, got {duration:?}"
        );
    }

    #[test]
    fn test_host_of_malformed_url() {
        assert_eq!(host_of("not a url"), "unknown");
        assert_eq!(host_of("https://Example.COM/x"), "example.com");
    }
}
