use crate::config::CrawlOptions;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A crawl job: fetch and process one url at one depth
///
/// Serialized as the work queue payload. Every job carries a full copy of
/// the crawl options, so a worker needs nothing but the payload and the
/// shared store to process it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRequest {
    pub crawl_id: String,

    pub url: String,

    /// Url of the page this one was discovered on
    #[serde(default)]
    pub parent: Option<String>,

    /// Link distance from the seed; seeds are depth 1
    pub depth: u32,

    /// Attempts already made for this job
    #[serde(default)]
    pub retries: u32,

    /// Trace id of the most recent attempt
    #[serde(default)]
    pub job_id: Option<String>,

    #[serde(default)]
    pub options: CrawlOptions,
}

impl ContentRequest {
    /// A depth-1 seed job
    pub fn seed(crawl_id: &str, url: &str, options: CrawlOptions) -> Self {
        Self {
            crawl_id: crawl_id.to_string(),
            url: url.to_string(),
            parent: None,
            depth: 1,
            retries: 0,
            job_id: None,
            options,
        }
    }

    /// A child job for `link`, discovered on this page
    ///
    /// The child inherits the crawl id and options, starts with a fresh
    /// retry count and sits one level deeper.
    pub fn child(&self, link: &str) -> Self {
        Self {
            crawl_id: self.crawl_id.clone(),
            url: link.to_string(),
            parent: Some(self.url.clone()),
            depth: self.depth + 1,
            retries: 0,
            job_id: None,
            options: self.options.clone(),
        }
    }

    /// The same job with its retry count bumped
    pub fn retried(&self) -> Self {
        Self {
            retries: self.retries + 1,
            ..self.clone()
        }
    }

    pub fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_payload(payload: &Value) -> Result<Self> {
        Ok(serde_json::from_value(payload.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_inherits_crawl_and_increments_depth() {
        let mut options = CrawlOptions::default();
        options.depth_limit = Some(3);
        let mut parent = ContentRequest::seed("c1", "http://example.com/", options);
        parent.retries = 2;
        parent.job_id = Some("job".to_string());

        let child = parent.child("http://example.com/a");

        assert_eq!(child.crawl_id, "c1");
        assert_eq!(child.url, "http://example.com/a");
        assert_eq!(child.parent.as_deref(), Some("http://example.com/"));
        assert_eq!(child.depth, 2);
        assert_eq!(child.retries, 0);
        assert_eq!(child.job_id, None);
        assert_eq!(child.options.depth_limit, Some(3));
    }

    #[test]
    fn test_retried_bumps_counter() {
        let request = ContentRequest::seed("c1", "http://example.com/", CrawlOptions::default());
        assert_eq!(request.retried().retries, 1);
        assert_eq!(request.retried().retried().retries, 2);
    }

    #[test]
    fn test_payload_with_missing_optional_fields() {
        let payload = json!({
            "crawl_id": "c1",
            "url": "http://example.com/",
            "depth": 1
        });

        let request = ContentRequest::from_payload(&payload).unwrap();
        assert_eq!(request.retries, 0);
        assert_eq!(request.parent, None);
        assert_eq!(request.options, CrawlOptions::default());
    }

    #[test]
    fn test_payload_fields() {
        let request = ContentRequest::seed("c1", "http://example.com/", CrawlOptions::default());
        let payload = request.to_payload().unwrap();
        assert_eq!(payload["crawl_id"], json!("c1"));
        assert_eq!(payload["depth"], json!(1));
        assert_eq!(payload["options"]["processing_queue"], json!("spindle_process_job"));
    }
}
