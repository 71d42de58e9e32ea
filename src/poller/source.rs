//! The contract every source adapter implements.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{ParseError, PollError, PolledItem};
use crate::fetch::{FetchClient, FetchError};

/// What one fetch produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// The source confirmed nothing changed since the last fetch.
    NotModified,
    /// A text body (feed XML or HTML).
    Text {
        body: String,
        content_type: Option<String>,
    },
    /// A decoded JSON document.
    Json(Value),
}

impl RawPayload {
    /// Short label for logs and errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotModified => "not-modified",
            Self::Text { .. } => "text",
            Self::Json(_) => "json",
        }
    }
}

/// A pollable upstream.
///
/// [`Poller`](super::Poller) drives the loop; implementors only describe
/// how to fetch, how to parse and, optionally, how to enrich new items.
/// The hooks default to doing nothing.
#[async_trait]
pub trait Source: Send + Sync {
    /// Name used in logs and as the message source.
    fn name(&self) -> &str;

    /// Fetches the current payload.
    async fn fetch_raw(&self, client: &FetchClient) -> Result<RawPayload, FetchError>;

    /// Turns a fetched payload into candidate items.
    ///
    /// Never called with [`RawPayload::NotModified`].
    fn parse_items(&self, raw: RawPayload) -> Result<Vec<PolledItem>, ParseError>;

    /// Returns the full text for a new item. The default extracts nothing.
    async fn extract_detail(
        &self,
        _client: &FetchClient,
        _item: &PolledItem,
        _timeout: Duration,
    ) -> Result<Option<String>, FetchError> {
        Ok(None)
    }

    /// Called after a failed cycle.
    fn on_error(&self, _error: &PollError) {}

    /// Called after a cycle without new items.
    fn on_idle(&self) {}

    /// Called with the new items of a cycle, after they were emitted.
    fn on_new_items(&self, _items: &[PolledItem]) {}
}
