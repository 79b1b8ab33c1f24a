//! HTML parser for extracting links and metadata
//!
//! This module handles parsing fetched content to extract:
//! - The page title
//! - Links, classified internal or external by the crawl's glob patterns
//! - Image sources

use crate::crawler::content::Content;
use crate::url::{is_internal, normalize_url, GlobPattern};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use url::Url;

/// Links and metadata extracted from a page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPage {
    pub title: Option<String>,

    /// In-scope links, normalized and deduplicated
    pub internal_links: Vec<String>,

    pub external_links: Vec<String>,

    pub images: Vec<String>,
}

/// Extracts links and metadata from fetched content
///
/// Only textual, non-error content is parsed; anything else yields an empty
/// page. Relative links resolve against the final url of the response.
///
/// # Link Extraction Rules
///
/// **Include:** `<a href>`, `<area href>`, `<link rel="canonical">`, `<frame src>`,
/// `<iframe src>`
///
/// **Exclude:** `javascript:`, `mailto:`, `tel:`, `data:` links, `<a download>`,
/// non-HTTP(S) urls after resolution
///
/// # Example
///
/// ```
/// use spindle::crawler::{extract_page, Content};
/// use spindle::GlobPattern;
///
/// let content = Content {
///     url: "https://example.com/".to_string(),
///     mime_type: "text/html".to_string(),
///     text_content: true,
///     body: r#"<title>Test</title><a href="/page">Link</a>"#.to_string(),
///     ..Default::default()
/// };
/// let internal = GlobPattern::compile_all(&["https://example.com/*"]).unwrap();
/// let page = extract_page(&content, &internal, &[]);
/// assert_eq!(page.title, Some("Test".to_string()));
/// assert_eq!(page.internal_links, vec!["https://example.com/page".to_string()]);
/// ```
pub fn extract_page(
    content: &Content,
    internal: &[GlobPattern],
    external: &[GlobPattern],
) -> ExtractedPage {
    if content.is_error() || !content.text_content {
        return ExtractedPage::default();
    }

    let base_url = match Url::parse(&content.url) {
        Ok(url) => url,
        Err(_) => return ExtractedPage::default(),
    };

    let document = Html::parse_document(&content.body);

    let mut internal_links = BTreeSet::new();
    let mut external_links = BTreeSet::new();
    for link in extract_links(&document, &base_url) {
        if is_internal(&link, internal, external) {
            internal_links.insert(link);
        } else {
            external_links.insert(link);
        }
    }

    ExtractedPage {
        title: extract_title(&document),
        internal_links: internal_links.into_iter().collect(),
        external_links: external_links.into_iter().collect(),
        images: extract_images(&document, &base_url),
    }
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    for (selector, attr) in [
        ("a[href]", "href"),
        ("area[href]", "href"),
        ("link[rel='canonical'][href]", "href"),
        ("frame[src]", "src"),
        ("iframe[src]", "src"),
    ] {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        for element in document.select(&selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(absolute) = element
                .value()
                .attr(attr)
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(absolute);
            }
        }
    }

    links
}

fn extract_images(document: &Html, base_url: &Url) -> Vec<String> {
    let Ok(selector) = Selector::parse("img[src]") else {
        return Vec::new();
    };

    let mut images = BTreeSet::new();
    for element in document.select(&selector) {
        if let Some(src) = element
            .value()
            .attr("src")
            .and_then(|src| resolve_link(src, base_url))
        {
            images.insert(src);
        }
    }
    images.into_iter().collect()
}

/// Resolves a link href to a normalized absolute url
///
/// Returns None for special schemes, unparseable hrefs and anything that is
/// not HTTP(S) after resolution.
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let joined = base_url.join(href).ok()?;
    normalize_url(joined.as_str()).ok().map(|url| url.to_string())
}
