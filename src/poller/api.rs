//! JSON API source.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::extract::{DetailExtractor, HtmlTextExtractor};
use super::{ParseError, PolledItem, RawPayload, Source};
use crate::fetch::{FetchClient, FetchError};

/// Turns a JSON document into candidate items.
pub trait JsonParser: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the document does not have the expected shape.
    fn parse(&self, document: &Value) -> anyhow::Result<Vec<PolledItem>>;
}

impl<F> JsonParser for F
where
    F: Fn(&Value) -> anyhow::Result<Vec<PolledItem>> + Send + Sync,
{
    fn parse(&self, document: &Value) -> anyhow::Result<Vec<PolledItem>> {
        self(document)
    }
}

/// Polls a JSON endpoint.
pub struct ApiSource {
    name: String,
    api_url: String,
    parser: Arc<dyn JsonParser>,
    extractor: Option<Arc<dyn DetailExtractor>>,
}

impl fmt::Debug for ApiSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSource")
            .field("name", &self.name)
            .field("api_url", &self.api_url)
            .field("extractor", &self.extractor.is_some())
            .finish_non_exhaustive()
    }
}

impl ApiSource {
    /// Creates an API source that extracts article text from item URLs.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        api_url: impl Into<String>,
        parser: impl JsonParser + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            api_url: api_url.into(),
            parser: Arc::new(parser),
            extractor: Some(Arc::new(HtmlTextExtractor::new())),
        }
    }

    /// Replaces the detail extractor; `None` disables extraction.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Option<Arc<dyn DetailExtractor>>) -> Self {
        self.extractor = extractor;
        self
    }

    #[must_use]
    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

#[async_trait]
impl Source for ApiSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_raw(&self, client: &FetchClient) -> Result<RawPayload, FetchError> {
        client.get_json(&self.api_url).await.map(RawPayload::Json)
    }

    fn parse_items(&self, raw: RawPayload) -> Result<Vec<PolledItem>, ParseError> {
        match raw {
            RawPayload::Json(document) => self
                .parser
                .parse(&document)
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
        match &self.extractor {
            Some(extractor) => extractor.extract(client, item, timeout).await,
            None => Ok(None),
        }
    }
}
