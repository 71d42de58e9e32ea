//! The normalized unit every source produces.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A candidate item parsed from a source.
///
/// `id` is the deduplication key. Items are built once and not mutated;
/// derived copies come from the consuming `with_*` builders.
///
/// # Example
///
/// ```
/// use newswatch_core::poller::PolledItem;
///
/// let item = PolledItem::new("urn:acme:1", "Acme beats estimates", "https://acme.test/pr/1")
///     .with_summary("Revenue up 12%")
///     .with_extension("tickers", serde_json::json!(["ACME"]));
/// assert_eq!(item.id(), "urn:acme:1");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolledItem {
    id: String,
    title: String,
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extensions: BTreeMap<String, Value>,
}

impl PolledItem {
    /// Creates an item with the required fields.
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            timestamp: None,
            summary: None,
            detail: None,
            extensions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Attaches extracted full text.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Adds a source-specific field.
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    #[must_use]
    pub fn extensions(&self) -> &BTreeMap<String, Value> {
        &self.extensions
    }

    #[must_use]
    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_builders_produce_new_values() {
        let base = PolledItem::new("1", "Title", "https://a.test/1");
        let detailed = base.clone().with_detail("full text");

        assert_eq!(base.detail(), None);
        assert_eq!(detailed.detail(), Some("full text"));
        assert_eq!(detailed.id(), base.id());
    }

    #[test]
    fn test_serialization_skips_empty_optionals() {
        let item = PolledItem::new("1", "Title", "https://a.test/1");
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(
            value,
            json!({"id": "1", "title": "Title", "url": "https://a.test/1"})
        );
    }

    #[test]
    fn test_deserialize_full_item() {
        let ts = Utc.with_ymd_and_hms(2025, 10, 21, 7, 28, 0).unwrap();
        let item = PolledItem::new("1", "T", "https://a.test/1")
            .with_timestamp(ts)
            .with_summary("s")
            .with_extension("categories", json!(["earnings"]));

        let text = serde_json::to_string(&item).unwrap();
        let back: PolledItem = serde_json::from_str(&text).unwrap();
        assert_eq!(back.timestamp(), Some(ts));
        assert_eq!(back.extension("categories"), Some(&json!(["earnings"])));
    }
}
