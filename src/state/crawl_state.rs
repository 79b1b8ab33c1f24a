//! Namespaced accessor for the shared state of one crawl
//!
//! Every key lives under `<prefix>:<crawl_id>`, so any number of crawls can
//! share one store. The accessor holds no crawl state itself: it is cheap to
//! clone and safe to construct independently in every worker.

use crate::storage::StateStore;
use crate::url::url_digest;
use crate::{Result, SpindleError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Key names under the crawl namespace
pub mod keys {
    pub const CRAWL_COUNTER: &str = "crawl-counter";
    pub const QUEUE_COUNTER: &str = "queue-counter";
    pub const FINISHED_ENQUEUED_COUNT: &str = "crawl_finished_enqueued_count";

    pub const QUEUED: &str = "queued";
    pub const CRAWLED: &str = "crawled";
    pub const CURRENTLY_RUNNING: &str = "currently_running";
    pub const INTERNAL_URLS: &str = "internal_urls";
    pub const WITHDRAWN: &str = "withdrawn";

    pub const DEPTH: &str = "depth";
    pub const JOB_IDS: &str = "job_ids";
    pub const CODES: &str = "codes";
    pub const STATISTICS: &str = "statistics";
    pub const DATA: &str = "data";

    pub const FINISHED: &str = "finished";
    pub const ORIGINAL_BASE_URL: &str = "original_base_url";

    pub const ROBOTS_PER_PAGE_DELAY: &str = "robots:per_page_delay";
    pub const ROBOTS_NEXT_RETRIEVAL: &str = "robots:next_retrieval";

    pub const FINISHED_LOCK: &str = "lock:finished";
}

/// Shared crawl state for one crawl id
#[derive(Clone)]
pub struct CrawlState {
    store: Arc<dyn StateStore>,
    crawl_id: String,
    namespace: String,
}

impl std::fmt::Debug for CrawlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlState")
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl CrawlState {
    pub fn new(store: Arc<dyn StateStore>, prefix: &str, crawl_id: &str) -> Self {
        Self {
            store,
            crawl_id: crawl_id.to_string(),
            namespace: format!("{}:{}", prefix, crawl_id),
        }
    }

    pub fn crawl_id(&self) -> &str {
        &self.crawl_id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Fully qualified store key for a name under this crawl
    pub fn key(&self, name: &str) -> String {
        format!("{}:{}", self.namespace, name)
    }

    async fn counter(&self, name: &str) -> Result<i64> {
        let key = self.key(name);
        match self.store.get(&key).await? {
            None => Ok(0),
            Some(raw) => raw.parse().map_err(|_| {
                SpindleError::Processing(format!("counter {} holds '{}'", key, raw))
            }),
        }
    }

    // ===== Counters =====

    /// Sets `crawl_count = 0` and `queue_count = 1` for a new crawl
    pub async fn initialize_counters(&self) -> Result<()> {
        self.store.set(&self.key(keys::CRAWL_COUNTER), "0").await?;
        self.store.set(&self.key(keys::QUEUE_COUNTER), "1").await?;
        Ok(())
    }

    pub async fn crawl_count(&self) -> Result<i64> {
        self.counter(keys::CRAWL_COUNTER).await
    }

    pub async fn queue_count(&self) -> Result<i64> {
        self.counter(keys::QUEUE_COUNTER).await
    }

    pub async fn finished_enqueued_count(&self) -> Result<i64> {
        self.counter(keys::FINISHED_ENQUEUED_COUNT).await
    }

    pub async fn increment_crawl_count(&self) -> Result<i64> {
        Ok(self.store.incr_by(&self.key(keys::CRAWL_COUNTER), 1).await?)
    }

    pub async fn increment_queue_count(&self) -> Result<i64> {
        Ok(self.store.incr_by(&self.key(keys::QUEUE_COUNTER), 1).await?)
    }

    /// Withdraws a job from the queue count when it will never be fetched
    pub async fn decrement_queue_count(&self) -> Result<i64> {
        Ok(self.store.incr_by(&self.key(keys::QUEUE_COUNTER), -1).await?)
    }

    pub async fn increment_finished_enqueued_count(&self) -> Result<i64> {
        Ok(self
            .store
            .incr_by(&self.key(keys::FINISHED_ENQUEUED_COUNT), 1)
            .await?)
    }

    // ===== Sets =====

    /// Adds a url to `queued`, returning `false` if it was already there
    pub async fn mark_queued(&self, url: &str) -> Result<bool> {
        Ok(self.store.set_add(&self.key(keys::QUEUED), url).await?)
    }

    pub async fn is_queued(&self, url: &str) -> Result<bool> {
        Ok(self.store.set_contains(&self.key(keys::QUEUED), url).await?)
    }

    pub async fn mark_crawled(&self, url: &str) -> Result<bool> {
        Ok(self.store.set_add(&self.key(keys::CRAWLED), url).await?)
    }

    pub async fn is_crawled(&self, url: &str) -> Result<bool> {
        Ok(self.store.set_contains(&self.key(keys::CRAWLED), url).await?)
    }

    /// Adds a url to `currently_running`
    ///
    /// # Returns
    ///
    /// `false` if another delivery of the same url already holds it
    pub async fn claim(&self, url: &str) -> Result<bool> {
        Ok(self
            .store
            .set_add(&self.key(keys::CURRENTLY_RUNNING), url)
            .await?)
    }

    /// Marks a url crawled and counts the fetch, once per url
    ///
    /// # Returns
    ///
    /// `false` if the url had already been crawled; nothing is counted then
    pub async fn record_fetch(&self, url: &str) -> Result<bool> {
        if !self.mark_crawled(url).await? {
            return Ok(false);
        }
        self.increment_crawl_count().await?;
        Ok(true)
    }

    /// Removes a url from `currently_running`; safe to call on any exit path
    pub async fn release(&self, url: &str) -> Result<bool> {
        Ok(self
            .store
            .set_remove(&self.key(keys::CURRENTLY_RUNNING), url)
            .await?)
    }

    pub async fn running_count(&self) -> Result<u64> {
        Ok(self.store.set_len(&self.key(keys::CURRENTLY_RUNNING)).await?)
    }

    pub async fn running_urls(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .set_members(&self.key(keys::CURRENTLY_RUNNING))
            .await?)
    }

    /// Takes a queued url out of the queue count without fetching it
    ///
    /// Idempotent per url: a redelivered or retried job never withdraws twice.
    ///
    /// # Returns
    ///
    /// `true` if this call withdrew the url
    pub async fn withdraw(&self, url: &str) -> Result<bool> {
        let newly = self.store.set_add(&self.key(keys::WITHDRAWN), url).await?;
        if newly {
            self.decrement_queue_count().await?;
        }
        Ok(newly)
    }

    /// Puts a withdrawn url back into the queue count before it is fetched
    ///
    /// # Returns
    ///
    /// `true` if the url had been withdrawn
    pub async fn reinstate(&self, url: &str) -> Result<bool> {
        let was = self
            .store
            .set_remove(&self.key(keys::WITHDRAWN), url)
            .await?;
        if was {
            self.increment_queue_count().await?;
        }
        Ok(was)
    }

    pub async fn add_internal_patterns(&self, patterns: &[String]) -> Result<()> {
        let key = self.key(keys::INTERNAL_URLS);
        for pattern in patterns {
            self.store.set_add(&key, pattern).await?;
        }
        Ok(())
    }

    pub async fn internal_patterns(&self) -> Result<Vec<String>> {
        Ok(self.store.set_members(&self.key(keys::INTERNAL_URLS)).await?)
    }

    // ===== Hashes =====

    pub async fn record_job_id(&self, url: &str, job_id: &str) -> Result<()> {
        self.store
            .hash_set(&self.key(keys::JOB_IDS), url, job_id)
            .await?;
        Ok(())
    }

    pub async fn job_id(&self, url: &str) -> Result<Option<String>> {
        Ok(self.store.hash_get(&self.key(keys::JOB_IDS), url).await?)
    }

    /// Records the depth a url was seen at, keeping the smallest ever seen
    ///
    /// # Returns
    ///
    /// The recorded depth after the call
    pub async fn record_depth(&self, url: &str, depth: u32) -> Result<u32> {
        let stored = self
            .store
            .hash_set_min(&self.key(keys::DEPTH), &url_digest(url), i64::from(depth))
            .await?;
        Ok(u32::try_from(stored).unwrap_or(depth))
    }

    pub async fn depth_of(&self, url: &str) -> Result<Option<u32>> {
        let raw = self
            .store
            .hash_get(&self.key(keys::DEPTH), &url_digest(url))
            .await?;
        Ok(raw.and_then(|d| d.parse().ok()))
    }

    pub async fn record_response_code(&self, url: &str, code: u16) -> Result<()> {
        self.store
            .hash_set(&self.key(keys::CODES), &url_digest(url), &code.to_string())
            .await?;
        Ok(())
    }

    pub async fn response_code(&self, url: &str) -> Result<Option<u16>> {
        let raw = self
            .store
            .hash_get(&self.key(keys::CODES), &url_digest(url))
            .await?;
        Ok(raw.and_then(|c| c.parse().ok()))
    }

    pub async fn set_statistic(&self, field: &str, value: &str) -> Result<()> {
        self.store
            .hash_set(&self.key(keys::STATISTICS), field, value)
            .await?;
        Ok(())
    }

    pub async fn increment_statistic(&self, field: &str, delta: i64) -> Result<i64> {
        Ok(self
            .store
            .hash_incr_by(&self.key(keys::STATISTICS), field, delta)
            .await?)
    }

    pub async fn statistics_fields(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.store.hash_get_all(&self.key(keys::STATISTICS)).await?)
    }

    /// Stores the caller data bag, one JSON-encoded field per entry
    pub async fn store_data(&self, data: &BTreeMap<String, Value>) -> Result<()> {
        let key = self.key(keys::DATA);
        for (field, value) in data {
            self.store
                .hash_set(&key, field, &serde_json::to_string(value)?)
                .await?;
        }
        Ok(())
    }

    pub async fn data(&self) -> Result<BTreeMap<String, Value>> {
        let raw = self.store.hash_get_all(&self.key(keys::DATA)).await?;
        let mut data = BTreeMap::new();
        for (field, value) in raw {
            data.insert(field, serde_json::from_str(&value)?);
        }
        Ok(data)
    }

    // ===== Scalars =====

    pub async fn set_original_base_url(&self, url: &str) -> Result<()> {
        self.store
            .set(&self.key(keys::ORIGINAL_BASE_URL), url)
            .await?;
        Ok(())
    }

    pub async fn original_base_url(&self) -> Result<Option<String>> {
        Ok(self.store.get(&self.key(keys::ORIGINAL_BASE_URL)).await?)
    }

    pub async fn is_finished(&self) -> Result<bool> {
        Ok(self.store.get(&self.key(keys::FINISHED)).await?.is_some())
    }

    /// Flips the finished flag; only the first caller ever gets `true`
    pub async fn try_mark_finished(&self) -> Result<bool> {
        Ok(self
            .store
            .set_if_absent(&self.key(keys::FINISHED), "true")
            .await?)
    }

    /// True when nothing is in flight and every queued job was fetched
    pub async fn is_quiescent(&self) -> Result<bool> {
        if self.running_count().await? > 0 {
            return Ok(false);
        }
        Ok(self.queue_count().await? == self.crawl_count().await?)
    }
}
