//! Per-source polling configuration.

use std::time::Duration;

use crate::config::{ConfigError, parse_bool, parse_non_negative_f64, parse_u64, process_env};
use crate::fetch::{FetchConfig, RetryPolicy};
use crate::user_agent;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_JITTER_FRACTION: f64 = 0.1;
const DEFAULT_ARTICLE_TIMEOUT: Duration = Duration::from_secs(8);
const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_NOCHANGE_GROWTH: f64 = 1.1;
const DEFAULT_ERROR_BACKOFF: f64 = 1.5;

/// Longest accepted base or maximum interval.
const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Jitter above this would let the sleep reach zero.
const MAX_JITTER_FRACTION: f64 = 0.9;

/// Resolved settings for one poller.
///
/// Built once from defaults, then `<PREFIX>_*` environment variables, then
/// explicit `with_*` overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Base interval between polls.
    pub poll_interval: Duration,
    pub user_agent: String,
    /// Minimum spacing between two HTTP requests of this poller.
    pub min_request_interval: Duration,
    /// Sleep is scaled by a random factor in `1 ± jitter_fraction`.
    pub jitter_fraction: f64,
    /// Do not fetch article bodies for new items.
    pub skip_extraction: bool,
    /// Log fetch, parse and extraction durations at debug level.
    pub timing: bool,
    /// Timeout for a single detail (article) request.
    pub article_timeout: Duration,
    /// Ceiling for the adaptive interval.
    pub max_poll_interval: Duration,
    /// Interval multiplier after a cycle without new items.
    pub nochange_growth: f64,
    /// Interval multiplier after a failed cycle.
    pub error_backoff: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            user_agent: user_agent::default_user_agent(),
            min_request_interval: DEFAULT_MIN_REQUEST_INTERVAL,
            jitter_fraction: DEFAULT_JITTER_FRACTION,
            skip_extraction: false,
            timing: false,
            article_timeout: DEFAULT_ARTICLE_TIMEOUT,
            max_poll_interval: DEFAULT_MAX_POLL_INTERVAL,
            nochange_growth: DEFAULT_NOCHANGE_GROWTH,
            error_backoff: DEFAULT_ERROR_BACKOFF,
        }
    }
}

fn seconds(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let value = parse_non_negative_f64(key, raw)?;
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::invalid(key, raw, "out of range"))
}

fn factor(key: &str, raw: &str) -> Result<f64, ConfigError> {
    let value = parse_non_negative_f64(key, raw)?;
    if value < 1.0 {
        return Err(ConfigError::invalid(key, raw, "factor must be at least 1.0"));
    }
    Ok(value)
}

impl PollerConfig {
    /// Resolves `<prefix>_*` variables from the process environment over
    /// `defaults`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is malformed or the resulting
    /// configuration is inconsistent.
    pub fn from_env(prefix: &str, defaults: Self) -> Result<Self, ConfigError> {
        Self::from_lookup(prefix, defaults, &process_env)
    }

    /// Like [`from_env`](Self::from_env), reading through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is malformed or the resulting
    /// configuration is inconsistent.
    pub fn from_lookup(
        prefix: &str,
        defaults: Self,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = defaults;
        let var = |name: &str| {
            let key = format!("{prefix}_{name}");
            lookup(&key).map(|raw| (key, raw))
        };

        if let Some((key, raw)) = var("POLL_INTERVAL") {
            let secs = parse_u64(&key, &raw)?;
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some((_, raw)) = var("USER_AGENT") {
            config.user_agent = raw;
        }
        if let Some((key, raw)) = var("MIN_REQUEST_INTERVAL_SEC") {
            config.min_request_interval = seconds(&key, &raw)?;
        }
        if let Some((key, raw)) = var("JITTER_FRACTION") {
            config.jitter_fraction = parse_non_negative_f64(&key, &raw)?;
        }
        if let Some((key, raw)) = var("SKIP_EXTRACTION") {
            config.skip_extraction = parse_bool(&key, &raw)?;
        }
        if let Some((key, raw)) = var("TIMING") {
            config.timing = parse_bool(&key, &raw)?;
        }
        if let Some((key, raw)) = var("ARTICLE_TIMEOUT_SEC") {
            config.article_timeout = seconds(&key, &raw)?;
        }
        if let Some((key, raw)) = var("MAX_POLL_INTERVAL") {
            config.max_poll_interval = seconds(&key, &raw)?;
        } else if config.max_poll_interval < config.poll_interval {
            config.max_poll_interval = config.poll_interval;
        }
        if let Some((key, raw)) = var("NOCHANGE_GROWTH") {
            config.nochange_growth = factor(&key, &raw)?;
        }
        if let Some((key, raw)) = var("ERROR_BACKOFF") {
            config.error_backoff = factor(&key, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid(
                "poll_interval",
                "0",
                "must be at least one second",
            ));
        }
        if self.poll_interval > MAX_INTERVAL || self.max_poll_interval > MAX_INTERVAL {
            return Err(ConfigError::invalid(
                "poll_interval",
                &format!("{}s", self.poll_interval.max(self.max_poll_interval).as_secs()),
                format!("must not exceed {}s", MAX_INTERVAL.as_secs()),
            ));
        }
        if self.jitter_fraction > MAX_JITTER_FRACTION {
            return Err(ConfigError::invalid(
                "jitter_fraction",
                &self.jitter_fraction.to_string(),
                format!("must not exceed {MAX_JITTER_FRACTION}"),
            ));
        }
        if self.max_poll_interval < self.poll_interval {
            return Err(ConfigError::invalid(
                "max_poll_interval",
                &format!("{}s", self.max_poll_interval.as_secs_f64()),
                "must not be below the poll interval",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        if self.max_poll_interval < poll_interval {
            self.max_poll_interval = poll_interval;
        }
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn with_min_request_interval(mut self, interval: Duration) -> Self {
        self.min_request_interval = interval;
        self
    }

    #[must_use]
    pub fn with_jitter_fraction(mut self, jitter_fraction: f64) -> Self {
        self.jitter_fraction = jitter_fraction;
        self
    }

    #[must_use]
    pub fn with_skip_extraction(mut self, skip: bool) -> Self {
        self.skip_extraction = skip;
        self
    }

    #[must_use]
    pub fn with_timing(mut self, timing: bool) -> Self {
        self.timing = timing;
        self
    }

    #[must_use]
    pub fn with_max_poll_interval(mut self, ceiling: Duration) -> Self {
        self.max_poll_interval = ceiling;
        self
    }

    /// Overrides the idle growth and error backoff factors.
    #[must_use]
    pub fn with_adaptive_factors(mut self, nochange_growth: f64, error_backoff: f64) -> Self {
        self.nochange_growth = nochange_growth;
        self.error_backoff = error_backoff;
        self
    }

    /// Fetch session settings for this poller.
    #[must_use]
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            user_agent: self.user_agent.clone(),
            min_request_interval: self.min_request_interval,
            retry: RetryPolicy::default(),
            ..FetchConfig::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PollerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.min_request_interval, Duration::from_millis(250));
        assert_eq!(config.article_timeout, Duration::from_secs(8));
        assert_eq!(config.max_poll_interval, Duration::from_secs(30));
        assert!((config.nochange_growth - 1.1).abs() < f64::EPSILON);
        assert!((config.error_backoff - 1.5).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_defaults() {
        let lookup = lookup_from(&[
            ("GNW_POLL_INTERVAL", "5"),
            ("GNW_USER_AGENT", "Desk/1.0 (desk@acme.io)"),
            ("GNW_MIN_REQUEST_INTERVAL_SEC", "0.5"),
            ("GNW_JITTER_FRACTION", "0.2"),
            ("GNW_SKIP_EXTRACTION", "yes"),
            ("GNW_TIMING", "1"),
            ("GNW_ARTICLE_TIMEOUT_SEC", "2.5"),
            ("GNW_MAX_POLL_INTERVAL", "60"),
            ("GNW_NOCHANGE_GROWTH", "1.25"),
            ("GNW_ERROR_BACKOFF", "2"),
        ]);
        let config = PollerConfig::from_lookup("GNW", PollerConfig::default(), &lookup).unwrap();

        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.user_agent, "Desk/1.0 (desk@acme.io)");
        assert_eq!(config.min_request_interval, Duration::from_millis(500));
        assert!(config.skip_extraction);
        assert!(config.timing);
        assert_eq!(config.article_timeout, Duration::from_millis(2500));
        assert_eq!(config.max_poll_interval, Duration::from_secs(60));
        assert!((config.nochange_growth - 1.25).abs() < f64::EPSILON);
        assert!((config.error_backoff - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_other_prefixes_ignored() {
        let lookup = lookup_from(&[("SEC_POLL_INTERVAL", "9")]);
        let config = PollerConfig::from_lookup("GNW", PollerConfig::default(), &lookup).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
    }

    #[test]
    fn test_malformed_values_rejected() {
        for (key, raw) in [
            ("X_POLL_INTERVAL", "soon"),
            ("X_SKIP_EXTRACTION", "perhaps"),
            ("X_NOCHANGE_GROWTH", "0.5"),
            ("X_JITTER_FRACTION", "0.95"),
            ("X_POLL_INTERVAL", "0"),
            ("X_POLL_INTERVAL", "18446744073709551615"),
            ("X_MAX_POLL_INTERVAL", "1e12"),
        ] {
            let lookup = lookup_from(&[(key, raw)]);
            assert!(
                PollerConfig::from_lookup("X", PollerConfig::default(), &lookup).is_err(),
                "{key}={raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_explicit_overrides_win() {
        let lookup = lookup_from(&[("X_POLL_INTERVAL", "5")]);
        let config = PollerConfig::from_lookup("X", PollerConfig::default(), &lookup)
            .unwrap()
            .with_poll_interval(Duration::from_secs(45))
            .with_user_agent("Override/1.0");

        assert_eq!(config.poll_interval, Duration::from_secs(45));
        assert_eq!(config.max_poll_interval, Duration::from_secs(45));
        assert_eq!(config.user_agent, "Override/1.0");
    }

    #[test]
    fn test_fetch_config_carries_identity_and_throttle() {
        let config = PollerConfig::default()
            .with_user_agent("Desk/1.0")
            .with_min_request_interval(Duration::from_secs(1));
        let fetch = config.fetch_config();
        assert_eq!(fetch.user_agent, "Desk/1.0");
        assert_eq!(fetch.min_request_interval, Duration::from_secs(1));
    }
}
