//! Worker loop: pulls crawl jobs off the work queue and runs them
//!
//! Each job runs in its own task so that a panic or an overrun of the job
//! timeout is caught here and handed to the retry policy instead of taking
//! the worker down.

use crate::config::WorkerConfig;
use crate::crawler::context::CrawlContext;
use crate::crawler::processor::{JobProcessor, JobReport};
use crate::crawler::request::ContentRequest;
use crate::storage::FailureRecord;
use crate::Result;
use std::sync::Arc;
use tokio::sync::watch;

/// How many times a job is attempted before it is abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// True if a job that has already been retried `retries` times and just
    /// failed again gets another attempt
    pub fn should_retry(&self, retries: u32) -> bool {
        retries.saturating_add(1) < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl From<&WorkerConfig> for RetryPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self::new(config.max_attempts)
    }
}

/// What happened to one dequeued job
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Completed(JobReport),
    Retried {
        url: String,
        attempt: u32,
        error: String,
    },
    Abandoned {
        url: String,
        error: String,
        finished: bool,
    },
    /// The payload was not a crawl job; it went straight to the failure store
    Discarded { error: String },
}

pub struct Worker {
    ctx: Arc<CrawlContext>,
    processor: Arc<JobProcessor>,
    retry: RetryPolicy,
}

impl Worker {
    pub fn new(ctx: Arc<CrawlContext>) -> Self {
        let retry = RetryPolicy::from(&ctx.worker);
        Self {
            processor: Arc::new(JobProcessor::new(ctx.clone())),
            ctx,
            retry,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Runs at most one job
    ///
    /// # Returns
    ///
    /// * `Ok(Some(WorkerEvent))` - A job was dequeued and dealt with
    /// * `Ok(None)` - The crawl queue is empty
    /// * `Err(SpindleError)` - The queue or store failed
    pub async fn run_once(&self) -> Result<Option<WorkerEvent>> {
        let queue = &self.ctx.worker.crawl_queue;
        let payload = match self.ctx.queue.dequeue(queue).await? {
            Some(payload) => payload,
            None => return Ok(None),
        };

        let request = match ContentRequest::from_payload(&payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("Discarding malformed job on {}: {}", queue, e);
                self.ctx
                    .queue
                    .record_failure(FailureRecord::new(queue, payload, e.to_string()))
                    .await?;
                return Ok(Some(WorkerEvent::Discarded {
                    error: e.to_string(),
                }));
            }
        };

        match self.execute(request.clone()).await {
            Ok(report) => Ok(Some(WorkerEvent::Completed(report))),
            Err(error) => self.handle_failure(request, error).await.map(Some),
        }
    }

    /// Runs jobs until the crawl queue is empty
    pub async fn run_until_idle(&self) -> Result<Vec<WorkerEvent>> {
        let mut events = Vec::new();
        while let Some(event) = self.run_once().await? {
            events.push(event);
        }
        Ok(events)
    }

    /// Runs jobs until `shutdown` turns true, polling while the queue is empty
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let poll = self.ctx.worker.poll_interval();
        tracing::info!("Worker listening on {}", self.ctx.worker.crawl_queue);

        while !*shutdown.borrow() {
            let idle = match self.run_once().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    tracing::error!("Worker error: {}", e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(poll) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("Worker stopped");
        Ok(())
    }

    /// Runs the processor in its own task, under the job timeout if one is set
    async fn execute(&self, request: ContentRequest) -> std::result::Result<JobReport, String> {
        let processor = self.processor.clone();
        let mut handle = tokio::spawn(async move { processor.process(request).await });

        let joined = match self.ctx.worker.job_timeout() {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return Err(format!("job terminated after {:?}", limit));
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) if e.is_panic() => Err("job panicked".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn handle_failure(&self, request: ContentRequest, error: String) -> Result<WorkerEvent> {
        if let Err(e) = self.processor.release(&request).await {
            tracing::warn!("Failed to release {}: {}", request.url, e);
        }

        let queue = &self.ctx.worker.crawl_queue;
        let attempt = request.retries + 1;

        if self.retry.should_retry(request.retries) {
            tracing::warn!(
                "Job for {} failed on attempt {} of {}: {}",
                request.url,
                attempt,
                self.retry.max_attempts,
                error
            );
            self.ctx
                .queue
                .enqueue(queue, &request.retried().to_payload()?)
                .await?;
            return Ok(WorkerEvent::Retried {
                url: request.url,
                attempt,
                error,
            });
        }

        tracing::error!(
            "Abandoning {} for crawl {} after {} attempts: {}",
            request.url,
            request.crawl_id,
            attempt,
            error
        );
        self.ctx
            .queue
            .record_failure(FailureRecord::new(queue, request.to_payload()?, &error))
            .await?;
        let finished = self.processor.abandon(&request).await?;

        Ok(WorkerEvent::Abandoned {
            url: request.url,
            error,
            finished,
        })
    }
}
