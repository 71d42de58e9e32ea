//! HTTP conditional revalidation state.

use reqwest::header::{
    ETAG, HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};

/// Cache validators remembered from the last successful response.
///
/// Replayed as `If-None-Match` / `If-Modified-Since` so an unchanged
/// resource answers `304 Not Modified` without a body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    /// Last `ETag` seen.
    pub etag: Option<String>,
    /// Last `Last-Modified` seen.
    pub last_modified: Option<String>,
}

impl Validators {
    /// Returns true if no validator has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }

    /// Adds the conditional request headers for the stored validators.
    pub fn apply(&self, headers: &mut HeaderMap) {
        if let Some(etag) = self.etag.as_deref()
            && let Ok(value) = HeaderValue::from_str(etag)
        {
            headers.insert(IF_NONE_MATCH, value);
        }
        if let Some(last_modified) = self.last_modified.as_deref()
            && let Ok(value) = HeaderValue::from_str(last_modified)
        {
            headers.insert(IF_MODIFIED_SINCE, value);
        }
    }

    /// Records validators from a fresh response.
    ///
    /// A header the server stopped sending is forgotten.
    pub fn update_from(&mut self, headers: &HeaderMap) {
        self.etag = header_string(headers, &ETAG);
        self.last_modified = header_string(headers, &LAST_MODIFIED);
    }
}

fn header_string(headers: &HeaderMap, name: &reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
