//! HTML listing-page source.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use super::extract::{DetailExtractor, HtmlTextExtractor};
use super::{ParseError, PolledItem, RawPayload, Source};
use crate::fetch::{ACCEPT_HTML, FetchClient, FetchError};

/// Turns a listing page into candidate items.
pub trait HtmlParser: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the page layout is not recognized.
    fn parse(&self, html: &str) -> anyhow::Result<Vec<PolledItem>>;
}

impl<F> HtmlParser for F
where
    F: Fn(&str) -> anyhow::Result<Vec<PolledItem>> + Send + Sync,
{
    fn parse(&self, html: &str) -> anyhow::Result<Vec<PolledItem>> {
        self(html)
    }
}

/// Scrapes a listing page; article text comes from the item pages,
/// narrowed by the configured container patterns.
pub struct HtmlSource {
    name: String,
    list_url: String,
    parser: Arc<dyn HtmlParser>,
    extractor: HtmlTextExtractor,
}

impl fmt::Debug for HtmlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HtmlSource")
            .field("name", &self.name)
            .field("list_url", &self.list_url)
            .field("extractor", &self.extractor)
            .finish_non_exhaustive()
    }
}

impl HtmlSource {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        list_url: impl Into<String>,
        parser: impl HtmlParser + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            list_url: list_url.into(),
            parser: Arc::new(parser),
            extractor: HtmlTextExtractor::new(),
        }
    }

    /// Adds a pattern locating the article body on item pages.
    #[must_use]
    pub fn with_container(mut self, pattern: Regex) -> Self {
        self.extractor = self.extractor.with_container(pattern);
        self
    }

    #[must_use]
    pub fn list_url(&self) -> &str {
        &self.list_url
    }
}

#[async_trait]
impl Source for HtmlSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_raw(&self, client: &FetchClient) -> Result<RawPayload, FetchError> {
        let body = client.get_text(&self.list_url, ACCEPT_HTML).await?;
        Ok(RawPayload::Text {
            body,
            content_type: None,
        })
    }

    fn parse_items(&self, raw: RawPayload) -> Result<Vec<PolledItem>, ParseError> {
        match raw {
            RawPayload::Text { body, .. } => self
                .parser
                .parse(&body)
                .map_err(|e| ParseError::collaborator(&self.name, format!("{e:#}"))),
            other => Err(ParseError::UnexpectedPayload {
                source_name: self.name.clone(),
                found: other.kind(),
            }),
        }
    }

    async fn extract_detail(
        &self,
        client: &FetchClient,
        item: &PolledItem,
        timeout: Duration,
    ) -> Result<Option<String>, FetchError> {
        self.extractor.extract(client, item, timeout).await
    }
}
