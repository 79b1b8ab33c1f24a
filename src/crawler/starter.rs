use crate::config::{validate_crawl_options, CrawlOptions};
use crate::crawler::context::CrawlContext;
use crate::crawler::request::ContentRequest;
use crate::state::{stats, throttle};
use crate::url::{default_internal_patterns, normalize_url};
use crate::{Result, SpindleError};
use chrono::Utc;
use std::sync::Arc;

/// Initializes shared state for a new crawl and enqueues its seeds
pub struct CrawlStarter {
    ctx: Arc<CrawlContext>,
}

impl CrawlStarter {
    pub fn new(ctx: Arc<CrawlContext>) -> Self {
        Self { ctx }
    }

    /// Starts a crawl at `base_url`
    ///
    /// Resolves the crawl id (generating one when the options carry none),
    /// derives internal patterns from the base url when none are given,
    /// initializes the counters and statistics, sets up the robots throttle
    /// if requested, then enqueues one depth-1 job per seed.
    ///
    /// # Returns
    ///
    /// * `Ok(ContentRequest)` - The seed job for `base_url`
    /// * `Err(SpindleError::InvalidArgument)` - No base url was given
    /// * `Err(SpindleError)` - Invalid options or a store failure
    pub async fn start(&self, base_url: &str, mut options: CrawlOptions) -> Result<ContentRequest> {
        let base_url = base_url.trim();
        if base_url.is_empty() {
            return Err(SpindleError::InvalidArgument(
                "base_url is required".to_string(),
            ));
        }
        validate_crawl_options(&options)?;
        let seed_url = normalize_url(base_url)?;

        let crawl_id = options
            .crawl_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        options.crawl_id = Some(crawl_id.clone());

        if options.internal_urls.is_empty() {
            options.internal_urls = default_internal_patterns(&seed_url);
        }

        let state = self.ctx.crawl_state(&crawl_id);
        state.set_original_base_url(base_url).await?;
        state
            .set_statistic(stats::QUEUED_AT, &Utc::now().to_rfc3339())
            .await?;
        state.initialize_counters().await?;
        state.store_data(&options.data).await?;
        state
            .set_statistic(stats::OPTIONS, &serde_json::to_string(&options)?)
            .await?;

        if options.respect_robots_delay {
            let delay = self
                .ctx
                .robots
                .crawl_delay(&seed_url, &options.user_agent)
                .await?;
            throttle::initialize(&state, delay).await?;
        }

        state.add_internal_patterns(&options.internal_urls).await?;

        let request = ContentRequest::seed(&crawl_id, seed_url.as_str(), options);
        state.mark_queued(&request.url).await?;
        self.ctx
            .queue
            .enqueue(&self.ctx.worker.crawl_queue, &request.to_payload()?)
            .await?;

        let mut seeded = 1;
        for extra in &request.options.seed_urls {
            let url = normalize_url(extra)?;
            if !state.mark_queued(url.as_str()).await? {
                continue;
            }
            state.increment_queue_count().await?;
            let job = ContentRequest::seed(&crawl_id, url.as_str(), request.options.clone());
            self.ctx
                .queue
                .enqueue(&self.ctx.worker.crawl_queue, &job.to_payload()?)
                .await?;
            seeded += 1;
        }

        tracing::info!(
            "Started crawl {} at {} with {} seed(s)",
            crawl_id,
            request.url,
            seeded
        );
        Ok(request)
    }
}
