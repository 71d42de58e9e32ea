//! Atom/RSS source with conditional revalidation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feed_rs::model::{Entry, Feed, Link, Text};
use feed_rs::parser::{self, ParseFeedResult};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::extract::{DetailExtractor, HtmlTextExtractor, strip_markup, strip_tags};
use super::{ParseError, PolledItem, RawPayload, Source};
use crate::fetch::{ACCEPT_FEED, FetchClient, FetchError, FetchOutcome, Validators};

/// Extension key holding an entry's category terms.
pub const CATEGORIES_EXTENSION: &str = "categories";

/// Parses a feed. Entries without an id (RSS items without `<guid>`) take
/// their first link as id, or stay empty when they have no link either.
fn parse_feed(body: &str) -> ParseFeedResult<Feed> {
    parser::Builder::new()
        .id_generator(|links: &[Link], _title: &Option<Text>, _uri: Option<&str>| {
            links
                .first()
                .map(|link| link.href.trim().to_string())
                .unwrap_or_default()
        })
        .build()
        .parse(body.as_bytes())
}

/// Plain text of a feed text construct. The XML layer has decoded entities
/// already; HTML content gets a second decode for its own entities.
fn feed_text(text: &Text) -> String {
    if text.content_type.essence_str() == "text/html" {
        strip_tags(&text.content)
    } else {
        strip_markup(&text.content)
    }
}

/// Refines or drops the item built for a feed entry.
pub trait FeedEntryMapper: Send + Sync {
    /// Returns the item to keep, or `None` to skip the entry.
    fn map(&self, entry: &Entry, item: PolledItem) -> Option<PolledItem>;
}

impl<F> FeedEntryMapper for F
where
    F: Fn(&Entry, PolledItem) -> Option<PolledItem> + Send + Sync,
{
    fn map(&self, entry: &Entry, item: PolledItem) -> Option<PolledItem> {
        self(entry, item)
    }
}

/// Polls one Atom or RSS feed.
///
/// `ETag` and `Last-Modified` from the last fresh response are replayed, so
/// an unchanged feed costs one 304 and no parsing.
pub struct FeedSource {
    name: String,
    url: String,
    validators: Mutex<Validators>,
    mapper: Option<Arc<dyn FeedEntryMapper>>,
    extractor: Option<Arc<dyn DetailExtractor>>,
}

impl fmt::Debug for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSource")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("mapper", &self.mapper.is_some())
            .field("extractor", &self.extractor.is_some())
            .finish_non_exhaustive()
    }
}

impl FeedSource {
    /// Creates a feed source that extracts article text with
    /// [`HtmlTextExtractor`].
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            validators: Mutex::new(Validators::default()),
            mapper: None,
            extractor: Some(Arc::new(HtmlTextExtractor::new())),
        }
    }

    #[must_use]
    pub fn with_mapper(mut self, mapper: impl FeedEntryMapper + 'static) -> Self {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    /// Replaces the detail extractor; `None` disables extraction.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Option<Arc<dyn DetailExtractor>>) -> Self {
        self.extractor = extractor;
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns a copy of the stored conditional validators.
    pub async fn validators(&self) -> Validators {
        self.validators.lock().await.clone()
    }

    fn entry_to_item(entry: &Entry) -> Option<PolledItem> {
        let link = entry.links.first().map(|link| link.href.clone());
        let id = if entry.id.trim().is_empty() {
            link.clone()?
        } else {
            entry.id.clone()
        };
        let title = entry
            .title
            .as_ref()
            .map(feed_text)
            .unwrap_or_default();

        let mut item = PolledItem::new(id, title, link.unwrap_or_default());
        if let Some(timestamp) = entry.published.or(entry.updated) {
            item = item.with_timestamp(timestamp);
        }
        if let Some(summary) = &entry.summary {
            let summary = feed_text(summary);
            if !summary.is_empty() {
                item = item.with_summary(summary);
            }
        }
        if !entry.categories.is_empty() {
            let terms = entry
                .categories
                .iter()
                .map(|category| Value::String(category.term.clone()))
                .collect();
            item = item.with_extension(CATEGORIES_EXTENSION, Value::Array(terms));
        }
        Some(item)
    }
}

#[async_trait]
impl Source for FeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_raw(&self, client: &FetchClient) -> Result<RawPayload, FetchError> {
        let mut validators = self.validators.lock().await;
        match client
            .conditional_get(&self.url, ACCEPT_FEED, &mut validators)
            .await?
        {
            FetchOutcome::NotModified => Ok(RawPayload::NotModified),
            FetchOutcome::Fresh { body, content_type } => {
                Ok(RawPayload::Text { body, content_type })
            }
        }
    }

    fn parse_items(&self, raw: RawPayload) -> Result<Vec<PolledItem>, ParseError> {
        let body = match raw {
            RawPayload::Text { body, .. } => body,
            other => {
                return Err(ParseError::UnexpectedPayload {
                    source_name: self.name.clone(),
                    found: other.kind(),
                });
            }
        };

        let feed = parse_feed(&body).map_err(|e| ParseError::Feed {
            source_name: self.name.clone(),
            message: e.to_string(),
        })?;

        let mut items = Vec::with_capacity(feed.entries.len());
        for entry in &feed.entries {
            let Some(item) = Self::entry_to_item(entry) else {
                trace!(source = %self.name, "skipping entry without id or link");
                continue;
            };
            let item = match &self.mapper {
                Some(mapper) => mapper.map(entry, item),
                None => Some(item),
            };
            items.extend(item);
        }
        debug!(source = %self.name, entries = feed.entries.len(), items = items.len(), "parsed feed");
        Ok(items)
    }

    async fn extract_detail(
        &self,
        client: &FetchClient,
        item: &PolledItem,
        timeout: Duration,
    ) -> Result<Option<String>, FetchError> {
        match &self.extractor {
            Some(extractor) => extractor.extract(client, item, timeout).await,
            None => Ok(None),
        }
    }
}
