use super::matcher::{matches_any, GlobPattern};
use url::Url;

/// Derives the default internal-url patterns for a base url
///
/// Returns `scheme://host/*` and `scheme://host:port/*` (port inferred from
/// the scheme when not explicit), so links written either way are in scope.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use spindle::url::default_internal_patterns;
///
/// let base = Url::parse("http://example.com/start").unwrap();
/// assert_eq!(
///     default_internal_patterns(&base),
///     vec!["http://example.com/*".to_string(), "http://example.com:80/*".to_string()]
/// );
/// ```
pub fn default_internal_patterns(base: &Url) -> Vec<String> {
    let host = match base.host_str() {
        Some(host) => host.to_lowercase(),
        None => return Vec::new(),
    };

    let mut patterns = vec![format!("{}://{}/*", base.scheme(), host)];
    if let Some(port) = base.port_or_known_default() {
        patterns.push(format!("{}://{}:{}/*", base.scheme(), host, port));
    }
    patterns
}

/// Classifies a link as internal
///
/// A link is internal when it matches at least one internal pattern and
/// none of the external patterns.
pub fn is_internal(link: &str, internal: &[GlobPattern], external: &[GlobPattern]) -> bool {
    matches_any(internal, link) && !matches_any(external, link)
}
