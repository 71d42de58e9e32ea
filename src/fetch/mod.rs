//! Resilient outbound HTTP for source adapters.
//!
//! Every request of a session passes a shared minimum-interval [`Throttle`],
//! is retried on transient failures per [`RetryPolicy`] (honoring
//! `Retry-After`), and may be revalidated with stored [`Validators`].

mod client;
mod conditional;
mod error;
mod retry;
mod throttle;

pub use client::{
    ACCEPT_FEED, ACCEPT_HTML, ACCEPT_JSON, FetchClient, FetchConfig, FetchOutcome,
};
pub use conditional::Validators;
pub use error::FetchError;
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, FailureType, RETRYABLE_STATUSES, RetryDecision, RetryPolicy,
    classify_error,
};
pub use throttle::{Throttle, parse_retry_after};
