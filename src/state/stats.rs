//! Crawl statistics snapshots
//!
//! This module assembles the statistics snapshot of a crawl from its shared
//! state. The snapshot is what the completion notification carries and what
//! the `status` command prints.

use crate::state::crawl_state::CrawlState;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Statistics hash field holding the crawl start time
pub const QUEUED_AT: &str = "queued_at";

/// Statistics hash field holding the crawl finish time
pub const FINISHED_AT: &str = "finished_at";

/// Statistics hash field holding the serialized crawl options
pub const OPTIONS: &str = "options";

/// Statistics hash field counting fetched body bytes
pub const BYTES: &str = "bytes";

const STATUS_PREFIX: &str = "status:";
const MIME_PREFIX: &str = "mime:";

/// Crawl statistics summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlStatistics {
    pub crawl_id: String,

    pub queued_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Pages actually fetched
    pub crawl_counter: i64,

    /// Jobs ever enqueued
    pub queue_counter: i64,

    /// Urls with an in-flight job at the time of the snapshot
    pub currently_running: u64,

    pub finished: bool,

    /// Total body bytes fetched
    pub total_bytes: i64,

    /// Pages by response status code
    pub status_counts: BTreeMap<String, i64>,

    /// Pages by mime type
    pub mime_counts: BTreeMap<String, i64>,

    /// Crawl options as recorded at start
    pub options: Option<Value>,
}

impl CrawlStatistics {
    /// Loads a snapshot from shared state
    ///
    /// # Arguments
    ///
    /// * `state` - The crawl to summarise
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlStatistics)` - Snapshot of the counters and statistics hash
    /// * `Err(SpindleError)` - Failed to read the store
    pub async fn load(state: &CrawlState) -> Result<Self> {
        let fields = state.statistics_fields().await?;

        let mut stats = CrawlStatistics {
            crawl_id: state.crawl_id().to_string(),
            crawl_counter: state.crawl_count().await?,
            queue_counter: state.queue_count().await?,
            currently_running: state.running_count().await?,
            finished: state.is_finished().await?,
            ..Default::default()
        };

        for (field, value) in fields {
            if let Some(code) = field.strip_prefix(STATUS_PREFIX) {
                stats
                    .status_counts
                    .insert(code.to_string(), value.parse().unwrap_or(0));
            } else if let Some(mime) = field.strip_prefix(MIME_PREFIX) {
                stats
                    .mime_counts
                    .insert(mime.to_string(), value.parse().unwrap_or(0));
            } else {
                match field.as_str() {
                    QUEUED_AT => stats.queued_at = parse_time(&value),
                    FINISHED_AT => stats.finished_at = parse_time(&value),
                    BYTES => stats.total_bytes = value.parse().unwrap_or(0),
                    OPTIONS => stats.options = serde_json::from_str(&value).ok(),
                    _ => {}
                }
            }
        }

        Ok(stats)
    }

    /// Seconds between start and finish, when both are known
    pub fn duration_secs(&self) -> Option<i64> {
        match (self.queued_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        }
    }

    /// The snapshot as a JSON object, ready to merge downstream fields into
    pub fn to_payload(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Adds one fetched page to the statistics hash
pub async fn record_page(
    state: &CrawlState,
    status_code: u16,
    mime_type: &str,
    length: u64,
) -> Result<()> {
    state
        .increment_statistic(&format!("{}{}", STATUS_PREFIX, status_code), 1)
        .await?;
    if !mime_type.is_empty() {
        state
            .increment_statistic(&format!("{}{}", MIME_PREFIX, mime_type), 1)
            .await?;
    }
    state
        .increment_statistic(BYTES, i64::try_from(length).unwrap_or(i64::MAX))
        .await?;
    Ok(())
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl {} ===\n", stats.crawl_id);

    println!("Overview:");
    println!(
        "  Status: {}",
        if stats.finished { "finished" } else { "running" }
    );
    if let Some(queued_at) = stats.queued_at {
        println!("  Queued at: {}", queued_at.to_rfc3339());
    }
    if let Some(finished_at) = stats.finished_at {
        println!("  Finished at: {}", finished_at.to_rfc3339());
    }
    if let Some(secs) = stats.duration_secs() {
        println!("  Duration: {}s", secs);
    }
    println!("  Pages fetched: {}", stats.crawl_counter);
    println!("  Jobs queued: {}", stats.queue_counter);
    println!("  In flight: {}", stats.currently_running);
    println!("  Bytes fetched: {}", stats.total_bytes);
    println!();

    if !stats.status_counts.is_empty() {
        println!("Pages by Status:");
        let mut counts: Vec<_> = stats.status_counts.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1));
        for (code, count) in counts {
            println!("  {}: {}", code, count);
        }
        println!();
    }

    if !stats.mime_counts.is_empty() {
        println!("Pages by Mime Type:");
        let mut counts: Vec<_> = stats.mime_counts.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1));
        for (mime, count) in counts {
            let percentage = if stats.crawl_counter > 0 {
                (*count as f64 / stats.crawl_counter as f64) * 100.0
            } else {
                0.0
            };
            println!("  {}: {} ({:.1}%)", mime, count, percentage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_load_statistics() {
        let state = CrawlState::new(Arc::new(MemoryBackend::new()), "spindle", "c1");
        state.initialize_counters().await.unwrap();
        state
            .set_statistic(QUEUED_AT, "2024-01-01T00:00:00+00:00")
            .await
            .unwrap();
        state
            .set_statistic(FINISHED_AT, "2024-01-01T00:01:30+00:00")
            .await
            .unwrap();
        state
            .set_statistic(OPTIONS, r#"{"depth_limit":2}"#)
            .await
            .unwrap();
        state.increment_crawl_count().await.unwrap();
        record_page(&state, 200, "text/html", 120).await.unwrap();
        record_page(&state, 404, "text/html", 30).await.unwrap();

        let stats = CrawlStatistics::load(&state).await.unwrap();

        assert_eq!(stats.crawl_id, "c1");
        assert_eq!(stats.crawl_counter, 1);
        assert_eq!(stats.queue_counter, 1);
        assert_eq!(stats.total_bytes, 150);
        assert_eq!(stats.status_counts.get("200"), Some(&1));
        assert_eq!(stats.status_counts.get("404"), Some(&1));
        assert_eq!(stats.mime_counts.get("text/html"), Some(&2));
        assert_eq!(stats.duration_secs(), Some(90));
        assert_eq!(stats.options, Some(serde_json::json!({"depth_limit": 2})));
        assert!(!stats.finished);
    }

    #[test]
    fn test_to_payload_is_object() {
        let stats = CrawlStatistics {
            crawl_id: "c1".to_string(),
            crawl_counter: 3,
            ..Default::default()
        };
        let payload = stats.to_payload().unwrap();
        assert_eq!(payload.get("crawl_counter"), Some(&Value::from(3)));
        assert_eq!(payload.get("crawl_id"), Some(&Value::from("c1")));
    }
}
