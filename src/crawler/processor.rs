//! Per-job state machine
//!
//! A job moves through: duplicate guard, retrieve, type filter, eligibility,
//! expansion and dispatch, then the completion check. Every state update is
//! made in the shared store, so any number of processors may run the same
//! crawl concurrently, in any order, with redelivered jobs.

use crate::crawler::content::Content;
use crate::crawler::context::CrawlContext;
use crate::crawler::dispatch;
use crate::crawler::parser::{extract_page, ExtractedPage};
use crate::crawler::request::ContentRequest;
use crate::state::{keys, stats, throttle, CrawlLock, CrawlState, CrawlStatistics};
use crate::url::{normalize_url, GlobPattern};
use crate::{Result, SpindleError};
use chrono::Utc;
use std::sync::Arc;
use url::Url;

/// Where a job ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The url was already crawled; nothing changed
    Duplicate,
    /// Retrieve declined: crawl limit reached or robots.txt disallows the url
    Refused,
    /// Fetched, but the mime type is not whitelisted
    RejectedType,
    /// Fetched, but the crawl was finished or out of limits by then
    Skipped,
    /// Fetched, expanded and dispatched
    Processed,
}

/// Summary of one processed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub url: String,
    pub outcome: JobOutcome,
    /// Child jobs enqueued by this job
    pub queued_links: usize,
    /// True for the single job that concluded the crawl
    pub finished: bool,
}

/// Result of the retrieve step
enum Retrieved {
    Refused,
    /// Another delivery recorded the fetch first
    AlreadyCrawled,
    Fetched(Content),
}

pub struct JobProcessor {
    ctx: Arc<CrawlContext>,
}

impl JobProcessor {
    pub fn new(ctx: Arc<CrawlContext>) -> Self {
        Self { ctx }
    }

    /// Runs one job to completion
    ///
    /// # Returns
    ///
    /// * `Ok(JobReport)` - The job finished, whatever its outcome
    /// * `Err(SpindleError)` - Store failure, strict-mode fetch error or lock
    ///   timeout; the url is released and the job is left to the retry policy
    pub async fn process(&self, mut request: ContentRequest) -> Result<JobReport> {
        let state = self.ctx.crawl_state(&request.crawl_id);

        // The holder of the url settles it; a concurrent copy leaves it alone
        if !state.claim(&request.url).await? {
            tracing::warn!(
                "{} is already running for crawl {}, skipping",
                request.url,
                request.crawl_id
            );
            return Ok(JobReport {
                url: request.url,
                outcome: JobOutcome::Duplicate,
                queued_links: 0,
                finished: false,
            });
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        state.record_job_id(&request.url, &job_id).await?;
        request.job_id = Some(job_id);

        if state.is_crawled(&request.url).await? {
            tracing::warn!(
                "Already crawled {} for crawl {}, skipping",
                request.url,
                request.crawl_id
            );
            // A retry of a job that died after its fetch may be the last one
            // in flight, so the completion check still runs
            let finished = self.settle(&state, &request).await?;
            return Ok(JobReport {
                url: request.url,
                outcome: JobOutcome::Duplicate,
                queued_links: 0,
                finished,
            });
        }

        tracing::info!(
            "Starting {} (crawl {}, depth {})",
            request.url,
            request.crawl_id,
            request.depth
        );

        let (outcome, queued_links) = match self.run(&state, &request).await {
            Ok(result) => result,
            Err(e) => {
                if let Err(release_err) = state.release(&request.url).await {
                    tracing::warn!("Failed to release {}: {}", request.url, release_err);
                }
                return Err(e);
            }
        };

        let finished = self.settle(&state, &request).await?;

        tracing::debug!(
            "Finished {} as {:?}: {} links queued",
            request.url,
            outcome,
            queued_links
        );

        Ok(JobReport {
            url: request.url,
            outcome,
            queued_links,
            finished,
        })
    }

    /// Removes the job's url from the in-flight set
    pub async fn release(&self, request: &ContentRequest) -> Result<()> {
        self.ctx
            .crawl_state(&request.crawl_id)
            .release(&request.url)
            .await?;
        Ok(())
    }

    /// Gives up on a job that exhausted its retries
    ///
    /// An unfetched url is withdrawn from the queue count and the completion
    /// check runs, so a permanently failed job cannot hold a crawl open.
    ///
    /// # Returns
    ///
    /// True if abandoning this job concluded the crawl
    pub async fn abandon(&self, request: &ContentRequest) -> Result<bool> {
        let state = self.ctx.crawl_state(&request.crawl_id);
        if !state.is_crawled(&request.url).await? {
            state.withdraw(&request.url).await?;
        }
        self.settle(&state, request).await
    }

    async fn run(&self, state: &CrawlState, request: &ContentRequest) -> Result<(JobOutcome, usize)> {
        let content = match self.retrieve(state, request).await? {
            Retrieved::Fetched(content) => content,
            Retrieved::Refused => return Ok((JobOutcome::Refused, 0)),
            Retrieved::AlreadyCrawled => return Ok((JobOutcome::Duplicate, 0)),
        };

        let valid_types = GlobPattern::compile_all(&request.options.valid_mime_types)?;
        if !content.permitted_type(&valid_types) {
            tracing::warn!(
                "Invalid mime type {} for {}",
                content.mime_type,
                request.url
            );
            return Ok((JobOutcome::RejectedType, 0));
        }

        if !self.to_be_processed(state, request).await? {
            tracing::debug!("Not processing {}: crawl finished or out of limits", request.url);
            return Ok((JobOutcome::Skipped, 0));
        }

        let internal = self.internal_patterns(state, request).await?;
        let external = GlobPattern::compile_all(&request.options.external_urls)?;
        let page = extract_page(&content, &internal, &external);

        let mut queued_links = 0;
        for link in page.internal_links.iter().chain(&content.redirect_through) {
            if self.enqueue_content(state, request, link).await? {
                queued_links += 1;
            }
        }

        if let Err(e) = self.do_crawl_processing(state, request, &content, &page).await {
            tracing::error!("Processing failed for {}: {}", request.url, e);
        }

        Ok((JobOutcome::Processed, queued_links))
    }

    /// Fetches the url, or declines without touching the fetch counters
    async fn retrieve(&self, state: &CrawlState, request: &ContentRequest) -> Result<Retrieved> {
        let options = &request.options;

        if !options.below_crawl_limit(state.crawl_count().await?) {
            tracing::warn!("Retrieve refused for {}: crawl limit reached", request.url);
            state.withdraw(&request.url).await?;
            return Ok(Retrieved::Refused);
        }

        if options.obey_robots {
            let url = Url::parse(&request.url)?;
            if !self.ctx.robots.is_allowed(&url, &options.user_agent).await? {
                tracing::warn!("Retrieve refused for {}: disallowed by robots.txt", request.url);
                state.withdraw(&request.url).await?;
                return Ok(Retrieved::Refused);
            }
        }

        state.reinstate(&request.url).await?;

        if options.respect_robots_delay {
            if let Some(wait) = throttle::reserve_slot(state).await? {
                if !wait.is_zero() {
                    tracing::trace!("Throttling {} for {:?}", request.url, wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }

        let content = self.ctx.fetcher.fetch(request).await?;

        // Detached so a terminated job cannot leave the url crawled but uncounted
        let recording = {
            let state = state.clone();
            let url = request.url.clone();
            tokio::spawn(async move { state.record_fetch(&url).await })
        };
        let counted = recording.await.map_err(|e| {
            SpindleError::Processing(format!("recording fetch of {}: {}", request.url, e))
        })??;
        if !counted {
            tracing::warn!("{} was crawled by another delivery, dropping this fetch", request.url);
            return Ok(Retrieved::AlreadyCrawled);
        }

        stats::record_page(state, content.status_code, &content.mime_type, content.length).await?;

        if let Some(error) = &content.error {
            tracing::warn!("Fetch error for {}: {}", request.url, error);
        }

        Ok(Retrieved::Fetched(content))
    }

    async fn to_be_processed(&self, state: &CrawlState, request: &ContentRequest) -> Result<bool> {
        let options = &request.options;
        if state.is_finished().await? || !options.within_depth_limit(request.depth) {
            return Ok(false);
        }
        let crawled = state.crawl_count().await?;
        Ok(options.below_crawl_limit(crawled - 1))
    }

    async fn internal_patterns(
        &self,
        state: &CrawlState,
        request: &ContentRequest,
    ) -> Result<Vec<GlobPattern>> {
        if !request.options.internal_urls.is_empty() {
            return Ok(GlobPattern::compile_all(&request.options.internal_urls)?);
        }
        Ok(GlobPattern::compile_all(&state.internal_patterns().await?)?)
    }

    /// Enqueues a child job for `link` unless it is out of limits or already
    /// queued
    async fn enqueue_content(
        &self,
        state: &CrawlState,
        request: &ContentRequest,
        link: &str,
    ) -> Result<bool> {
        let link = match normalize_url(link) {
            Ok(url) => url.to_string(),
            Err(e) => {
                tracing::debug!("Skipping link {}: {}", link, e);
                return Ok(false);
            }
        };

        let child = request.child(&link);
        if !request.options.within_depth_limit(child.depth) {
            return Ok(false);
        }
        if !request.options.below_crawl_limit(state.queue_count().await?) {
            return Ok(false);
        }
        if !state.mark_queued(&link).await? {
            return Ok(false);
        }

        state.increment_queue_count().await?;
        self.ctx
            .queue
            .enqueue(&self.ctx.worker.crawl_queue, &child.to_payload()?)
            .await?;
        tracing::trace!("Queued {} at depth {}", link, child.depth);
        Ok(true)
    }

    async fn do_crawl_processing(
        &self,
        state: &CrawlState,
        request: &ContentRequest,
        content: &Content,
        page: &ExtractedPage,
    ) -> Result<()> {
        let payload = dispatch::content_payload(content, page, request)?;
        let mode = dispatch::send_to_processing_queue(&self.ctx, payload, request).await?;
        tracing::debug!("Dispatched {} ({:?})", request.url, mode);

        if let Some(counter) = &request.options.enqueue_counter {
            self.ctx
                .store
                .hash_incr_by(
                    &format!("{}:{}", counter.namespace, counter.key),
                    &counter.field,
                    1,
                )
                .await?;
        }

        if request.options.store_response_codes {
            state
                .record_response_code(&request.url, content.status_code)
                .await?;
        }

        state.record_depth(&request.url, request.depth).await?;
        Ok(())
    }

    /// Releases the url and runs the completion check under the crawl lock
    async fn settle(&self, state: &CrawlState, request: &ContentRequest) -> Result<bool> {
        let lock = CrawlLock::acquire(
            self.ctx.store.clone(),
            &state.key(keys::FINISHED_LOCK),
            &self.ctx.lock_settings(),
        )
        .await?;

        let result = self.finish_if_complete(state, request).await;
        lock.release().await?;
        result
    }

    async fn finish_if_complete(&self, state: &CrawlState, request: &ContentRequest) -> Result<bool> {
        state.release(&request.url).await?;

        if !state.is_quiescent().await? || !state.try_mark_finished().await? {
            return Ok(false);
        }

        state
            .set_statistic(stats::FINISHED_AT, &Utc::now().to_rfc3339())
            .await?;
        let statistics = CrawlStatistics::load(state).await?;
        let payload =
            dispatch::finished_payload(&statistics, request, state.original_base_url().await?)?;

        state.increment_finished_enqueued_count().await?;
        self.ctx
            .queue
            .enqueue(&request.options.crawl_finished_queue, &payload)
            .await?;

        tracing::info!(
            "Crawl {} finished: {} pages fetched",
            request.crawl_id,
            statistics.crawl_counter
        );
        Ok(true)
    }
}
