use crate::UrlError;
use sha2::{Digest, Sha256};
use url::Url;

/// Normalizes a URL before it is used as a crawl-state key
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Only `http` and `https` are crawlable
/// 3. Require a host
/// 4. Lowercase the host and resolve dot segments (done by the parser)
/// 5. Remove the fragment
///
/// Query strings and trailing slashes are kept as-is: two urls that differ
/// there are distinct pages as far as the queued/crawled sets are concerned.
///
/// # Examples
///
/// ```
/// use spindle::url::normalize_url;
///
/// let url = normalize_url("http://EXAMPLE.com/a/../page#top").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/page");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingDomain);
    }

    url.set_fragment(None);

    Ok(url)
}

/// Hex SHA-256 digest of a url, used as the field name in the `depth` and
/// `codes` hashes and in response cache keys
pub fn url_digest(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}
