//! Primary-text extraction from article pages.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::PolledItem;
use crate::fetch::{ACCEPT_HTML, FetchClient, FetchError};

#[allow(clippy::expect_used)]
static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("script regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static STYLE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("style regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<p\b[^>]*>(.*?)</p\s*>").expect("paragraph regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").expect("tag regex is valid")); // Static pattern, safe to panic

#[allow(clippy::expect_used)]
static MULTISPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("whitespace regex is valid")); // Static pattern, safe to panic

/// Removes tags, decodes entities and collapses runs of whitespace.
#[must_use]
pub fn strip_tags(html: &str) -> String {
    let text = TAG.replace_all(html, " ");
    let text = html_escape::decode_html_entities(&text);
    MULTISPACE.replace_all(&text, " ").trim().to_string()
}

/// Removes tags and collapses runs of whitespace. Entities are left as they
/// are.
#[must_use]
pub fn strip_markup(text: &str) -> String {
    let text = TAG.replace_all(text, " ");
    MULTISPACE.replace_all(&text, " ").trim().to_string()
}

/// Returns the readable body text of an HTML page.
///
/// Script and style blocks are dropped first. The first container pattern
/// that matches narrows the scope (to capture group 1 when the pattern has
/// one). Inside the scope, `<p>` contents are joined by blank lines; a scope
/// without paragraphs is stripped as a whole. Returns an empty string when
/// nothing readable remains.
#[must_use]
pub fn extract_primary_text_from_html(html: &str, containers: &[Regex]) -> String {
    let cleaned = SCRIPT_BLOCK.replace_all(html, " ");
    let cleaned = STYLE_BLOCK.replace_all(&cleaned, " ");

    let scope = containers
        .iter()
        .find_map(|pattern| {
            pattern
                .captures(&cleaned)
                .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
                .map(|m| m.as_str())
        })
        .unwrap_or(&*cleaned);

    let paragraphs: Vec<String> = PARAGRAPH
        .captures_iter(scope)
        .filter_map(|caps| caps.get(1))
        .map(|m| strip_tags(m.as_str()))
        .filter(|text| !text.is_empty())
        .collect();

    if paragraphs.is_empty() {
        strip_tags(scope)
    } else {
        paragraphs.join("\n\n")
    }
}

/// Produces the full text for a newly seen item.
#[async_trait]
pub trait DetailExtractor: Send + Sync {
    /// Returns the item's detail text, or `None` when there is nothing
    /// worth attaching.
    async fn extract(
        &self,
        client: &FetchClient,
        item: &PolledItem,
        timeout: Duration,
    ) -> Result<Option<String>, FetchError>;
}

/// Fetches the item's page and applies [`extract_primary_text_from_html`].
#[derive(Debug, Clone, Default)]
pub struct HtmlTextExtractor {
    containers: Vec<Regex>,
}

impl HtmlTextExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a container pattern tried before the whole page.
    #[must_use]
    pub fn with_container(mut self, pattern: Regex) -> Self {
        self.containers.push(pattern);
        self
    }
}

#[async_trait]
impl DetailExtractor for HtmlTextExtractor {
    async fn extract(
        &self,
        client: &FetchClient,
        item: &PolledItem,
        timeout: Duration,
    ) -> Result<Option<String>, FetchError> {
        if item.url().is_empty() {
            return Ok(None);
        }
        let html = client
            .get_text_within(item.url(), ACCEPT_HTML, Some(timeout))
            .await?;
        let text = extract_primary_text_from_html(&html, &self.containers);
        debug!(id = item.id(), chars = text.len(), "extracted detail");
        Ok((!text.is_empty()).then_some(text))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_tags_decodes_and_collapses() {
        assert_eq!(
            strip_tags("<b>Profit</b>   &amp;\n\n <i>loss</i>"),
            "Profit & loss"
        );
    }

    #[test]
    fn test_strip_markup_keeps_entities() {
        assert_eq!(strip_markup("  AT&amp;T <b>wins</b>\n\n bid "), "AT&amp;T wins bid");
    }

    #[test]
    fn test_scripts_and_styles_are_removed() {
        let html = r"<html><head><style>p { color: red }</style></head>
            <body><script>var x = '<p>nope</p>';</script><p>Kept</p></body></html>";
        assert_eq!(extract_primary_text_from_html(html, &[]), "Kept");
    }

    #[test]
    fn test_paragraphs_joined_by_blank_line() {
        let html = "<div><p>First <em>one</em>.</p><p class=\"x\">Second.</p><p> </p></div>";
        assert_eq!(
            extract_primary_text_from_html(html, &[]),
            "First one .\n\nSecond."
        );
    }

    #[test]
    fn test_container_capture_group_narrows_scope() {
        let html = "<nav><p>Menu</p></nav><article><p>Body text</p></article>";
        let container = Regex::new(r"(?is)<article[^>]*>(.*?)</article>").unwrap();
        assert_eq!(extract_primary_text_from_html(html, &[container]), "Body text");
    }

    #[test]
    fn test_container_without_group_uses_whole_match() {
        let html = "<nav><p>Menu</p></nav><main><p>Body</p></main>";
        let container = Regex::new(r"(?is)<main>.*?</main>").unwrap();
        assert_eq!(extract_primary_text_from_html(html, &[container]), "Body");
    }

    #[test]
    fn test_falls_back_to_stripped_scope() {
        let html = "<div>Plain <span>text</span> only</div>";
        assert_eq!(extract_primary_text_from_html(html, &[]), "Plain text only");
    }

    #[test]
    fn test_unmatched_container_uses_page() {
        let html = "<p>Page</p>";
        let container = Regex::new(r"(?is)<article>(.*?)</article>").unwrap();
        assert_eq!(extract_primary_text_from_html(html, &[container]), "Page");
    }
}
