use crate::UrlError;
use regex::Regex;

/// A compiled glob pattern
///
/// Used for both internal-url classification (`http://example.com/*`) and
/// the mime-type whitelist (`text/*`). Every character is literal except
/// `*`, which matches any sequence (non-greedy). Matching is anchored at the
/// start of the candidate only, so `text/html` matches `text/html; charset=utf-8`.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compiles a glob pattern
    pub fn new(pattern: &str) -> Result<Self, UrlError> {
        if pattern.is_empty() {
            return Err(UrlError::InvalidPattern {
                pattern: pattern.to_string(),
                message: "pattern cannot be empty".to_string(),
            });
        }

        let regex = Regex::new(&glob_to_regex(pattern)).map_err(|e| UrlError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Compiles a list of patterns, failing on the first invalid one
    pub fn compile_all<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Self>, UrlError> {
        patterns.iter().map(|p| Self::new(p.as_ref())).collect()
    }

    /// Returns true if the candidate matches this pattern
    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    /// The pattern as originally written
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Returns true if any of the patterns matches the candidate
pub fn matches_any(patterns: &[GlobPattern], candidate: &str) -> bool {
    patterns.iter().any(|p| p.is_match(candidate))
}

/// Translates glob syntax into a start-anchored regular expression
///
/// ```
/// use spindle::url::glob_to_regex;
///
/// assert_eq!(glob_to_regex("text/*"), r"^text/.*?");
/// assert_eq!(glob_to_regex("application/xhtml+xml"), r"^application/xhtml\+xml");
/// ```
pub fn glob_to_regex(pattern: &str) -> String {
    let mut expression = String::from("^");
    for (index, literal) in pattern.split('*').enumerate() {
        if index > 0 {
            expression.push_str(".*?");
        }
        expression.push_str(&regex::escape(literal));
    }
    expression
}
