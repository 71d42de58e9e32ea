//! Adaptive polling interval.
//!
//! Quiet sources are polled less often, failing sources back off, and any
//! new item snaps the interval back to the configured base.

use std::time::Duration;

use rand::Rng;

use super::PollerConfig;

/// Shortest sleep between two cycles.
pub const MIN_SLEEP: Duration = Duration::from_secs(1);

/// Current interval plus the policy that moves it.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveInterval {
    base: Duration,
    current: Duration,
    ceiling: Duration,
    nochange_growth: f64,
    error_backoff: f64,
    jitter_fraction: f64,
}

impl AdaptiveInterval {
    #[must_use]
    pub fn new(config: &PollerConfig) -> Self {
        Self {
            base: config.poll_interval,
            current: config.poll_interval,
            ceiling: config.max_poll_interval.max(config.poll_interval),
            nochange_growth: config.nochange_growth,
            error_backoff: config.error_backoff,
            jitter_fraction: config.jitter_fraction,
        }
    }

    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }

    #[must_use]
    pub fn base(&self) -> Duration {
        self.base
    }

    #[must_use]
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// New items arrived: back to the base interval.
    pub fn on_new_items(&mut self) {
        self.current = self.base;
    }

    /// Nothing new: grow by the idle factor, up to the ceiling.
    pub fn on_idle(&mut self) {
        self.current = self.scaled(self.current, self.nochange_growth);
    }

    /// The cycle failed: back off from at least the base interval.
    pub fn on_error(&mut self) {
        self.current = self.scaled(self.current.max(self.base), self.error_backoff);
    }

    fn scaled(&self, from: Duration, factor: f64) -> Duration {
        scale(from, factor.max(1.0), self.ceiling)
    }

    /// Sleep before the next cycle: `current × (1 ± jitter)`, at least
    /// [`MIN_SLEEP`].
    #[must_use]
    pub fn sleep_duration(&self) -> Duration {
        let jitter = self.jitter_fraction.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            1.0
        };
        scale(self.current, factor, Duration::MAX).max(MIN_SLEEP)
    }
}

/// `from × factor`, saturating at `limit` instead of overflowing.
fn scale(from: Duration, factor: f64, limit: Duration) -> Duration {
    Duration::try_from_secs_f64(from.as_secs_f64() * factor)
        .map_or(limit, |scaled| scaled.min(limit))
}
