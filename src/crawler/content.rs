use crate::config::CrawlOptions;
use crate::url::GlobPattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mime type of content recording a redirect loop or redirect limit
pub const REDIRECT_ERROR: &str = "error/redirecterror";

/// Mime type of content recording a connection or name resolution failure
pub const SOCKET_ERROR: &str = "error/socketerror";

/// Mime type of content recording a timeout
pub const SERVER_DOWN: &str = "error/serverdown";

/// A fetched (or failed) response, normalized for processing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Final url after redirects
    pub url: String,

    /// Url as requested
    pub base_url: String,

    /// Response status; 0 for error content
    pub status_code: u16,

    /// Mime type without parameters
    pub mime_type: String,

    pub character_set: Option<String>,

    pub headers: BTreeMap<String, String>,

    pub body: String,

    /// Content-Length when given, otherwise body length
    pub length: u64,

    /// Location header of the final response
    pub location: Option<String>,

    /// Redirect targets followed, in order
    pub redirect_through: Vec<String>,

    /// Seconds from request to body
    pub response_time: f64,

    /// Error message for error content
    pub error: Option<String>,

    pub text_content: bool,
}

impl Content {
    /// Structured error content for a failed fetch
    pub fn error(url: &str, mime_type: &str, message: impl Into<String>, elapsed: f64) -> Self {
        Self {
            url: url.to_string(),
            base_url: url.to_string(),
            mime_type: mime_type.to_string(),
            error: Some(message.into()),
            response_time: elapsed,
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether the mime type passes the crawl's whitelist
    pub fn permitted_type(&self, valid_mime_types: &[GlobPattern]) -> bool {
        crate::url::matches_any(valid_mime_types, &self.mime_type)
    }
}

/// Splits a Content-Type header into mime type and character set
///
/// ```
/// use spindle::crawler::split_content_type;
///
/// assert_eq!(
///     split_content_type("text/html; charset=UTF-8"),
///     ("text/html".to_string(), Some("UTF-8".to_string()))
/// );
/// ```
pub fn split_content_type(header: &str) -> (String, Option<String>) {
    let mut parts = header.split(';');
    let mime_type = parts.next().unwrap_or("").trim().to_ascii_lowercase();
    let charset = parts.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    });
    (mime_type, charset)
}

/// Whether a mime type counts as text under the crawl's options
pub fn is_text_type(mime_type: &str, options: &CrawlOptions) -> bool {
    options
        .text_mime_types
        .iter()
        .filter_map(|p| GlobPattern::new(p).ok())
        .any(|p| p.is_match(mime_type))
}
