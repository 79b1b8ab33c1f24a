use crate::storage::{FailureRecord, WorkQueue};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;

/// Failure records scanned per maintenance query
pub const FAILURE_SCAN_WINDOW: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Jobs waiting on the crawl queue
    pub queued: u64,
    /// Crawl jobs in the failure store
    pub failed: u64,
}

/// Operational queries and repairs over the crawl queue's failure records
pub struct CrawlMaintenance {
    queue: Arc<dyn WorkQueue>,
    crawl_queue: String,
}

impl CrawlMaintenance {
    pub fn new(queue: Arc<dyn WorkQueue>, crawl_queue: &str) -> Self {
        Self {
            queue,
            crawl_queue: crawl_queue.to_string(),
        }
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let total = usize::try_from(self.queue.failure_count().await?).unwrap_or(usize::MAX);
        let failed = self
            .queue
            .failures(0, total)
            .await?
            .iter()
            .filter(|record| record.queue == self.crawl_queue)
            .count() as u64;

        Ok(QueueStats {
            queued: self.queue.size(&self.crawl_queue).await?,
            failed,
        })
    }

    /// Failed crawl jobs within the scan window
    pub async fn failed_jobs(&self) -> Result<Vec<FailureRecord>> {
        Ok(self
            .queue
            .failures(0, FAILURE_SCAN_WINDOW)
            .await?
            .into_iter()
            .filter(|record| record.queue == self.crawl_queue)
            .collect())
    }

    pub async fn failed_jobs_for_crawl(&self, crawl_id: &str) -> Result<Vec<FailureRecord>> {
        Ok(self
            .failed_jobs()
            .await?
            .into_iter()
            .filter(|record| record.crawl_id() == Some(crawl_id))
            .collect())
    }

    /// Puts a crawl's failed jobs back on the crawl queue
    ///
    /// Only the scan window is considered. Requeued records are removed from
    /// the failure store.
    ///
    /// # Returns
    ///
    /// The number of jobs requeued
    pub async fn requeue_failed_jobs(&self, crawl_id: &str) -> Result<usize> {
        let records = self.queue.failures(0, FAILURE_SCAN_WINDOW).await?;

        let mut requeued = Vec::new();
        for (index, record) in records.iter().enumerate() {
            if record.queue != self.crawl_queue || record.crawl_id() != Some(crawl_id) {
                continue;
            }
            self.queue.requeue_failure(index).await?;
            requeued.push(index);
        }

        // Highest index first so earlier removals don't shift later ones
        for index in requeued.iter().rev() {
            self.queue.remove_failure(*index).await?;
        }

        tracing::info!(
            "Requeued {} failed job(s) for crawl {}",
            requeued.len(),
            crawl_id
        );
        Ok(requeued.len())
    }
}
