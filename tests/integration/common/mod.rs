//! Shared helpers for the integration tests: an in-memory site, a stub
//! fetcher over it and a multi-worker driver

#![allow(dead_code)]

use async_trait::async_trait;
use spindle::crawler::{Content, ContentRequest, CrawlContext, Fetcher, WorkerEvent};
use spindle::robots::RobotsSource;
use spindle::{MemoryBackend, SpindleError, StateStore, Worker, WorkerConfig, WorkQueue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub const SITE: &str = "http://site.test";

/// Builds an html page linking to `links`
pub fn page(links: &[String]) -> String {
    let anchors: String = links
        .iter()
        .map(|link| format!(r#"<a href="{}">{}</a>"#, link, link))
        .collect();
    format!("<html><head><title>page</title></head><body>{}</body></html>", anchors)
}

/// A site of `fan_out` sections with `fan_out` leaves each
///
/// Every leaf links back to the root and to its next sibling, so most links
/// are discovered more than once.
pub fn tree_site(fan_out: usize) -> HashMap<String, String> {
    let mut pages = HashMap::new();
    let root = format!("{}/", SITE);

    let sections: Vec<String> = (0..fan_out).map(|i| format!("{}/s{}", SITE, i)).collect();
    pages.insert(root.clone(), page(&sections));

    for (i, section) in sections.iter().enumerate() {
        let leaves: Vec<String> = (0..fan_out)
            .map(|j| format!("{}/s{}/l{}", SITE, i, j))
            .collect();
        pages.insert(section.clone(), page(&leaves));

        for (j, leaf) in leaves.iter().enumerate() {
            let sibling = format!("{}/s{}/l{}", SITE, i, (j + 1) % fan_out);
            pages.insert(leaf.clone(), page(&[root.clone(), sibling]));
        }
    }
    pages
}

/// Serves pages from memory, optionally failing chosen urls a number of
/// times first
pub struct StubFetcher {
    pages: HashMap<String, String>,
    failures: Mutex<HashMap<String, usize>>,
    fetched: Mutex<Vec<String>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl StubFetcher {
    pub fn new(pages: HashMap<String, String>) -> Self {
        Self {
            pages,
            failures: Mutex::new(HashMap::new()),
            fetched: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fails `url` for its next `times` fetches
    pub fn failing(self, url: &str, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
        self
    }

    /// Urls successfully fetched, in order
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    /// Every fetch attempt, failed or not
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &ContentRequest) -> spindle::Result<Content> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&request.url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SpindleError::Fetch {
                        url: request.url.clone(),
                        message: "connection reset".to_string(),
                    });
                }
            }
        }

        self.fetched.lock().unwrap().push(request.url.clone());
        let (status_code, body) = match self.pages.get(&request.url) {
            Some(body) => (200, body.clone()),
            None => (404, String::new()),
        };
        Ok(Content {
            url: request.url.clone(),
            base_url: request.url.clone(),
            status_code,
            mime_type: "text/html".to_string(),
            text_content: true,
            length: body.len() as u64,
            body,
            ..Default::default()
        })
    }
}

pub struct AllowAll;

#[async_trait]
impl RobotsSource for AllowAll {
    async fn crawl_delay(&self, _: &Url, _: &str) -> spindle::Result<f64> {
        Ok(0.0)
    }

    async fn is_allowed(&self, _: &Url, _: &str) -> spindle::Result<bool> {
        Ok(true)
    }
}

/// Worker settings with short polls, so tests don't sit idle
pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval_ms: 5,
        lock_poll_ms: 1,
        ..WorkerConfig::default()
    }
}

pub fn stub_context<B>(backend: Arc<B>, fetcher: Arc<StubFetcher>) -> Arc<CrawlContext>
where
    B: StateStore + WorkQueue + 'static,
{
    Arc::new(CrawlContext::new(
        backend.clone(),
        backend,
        fetcher,
        Arc::new(AllowAll),
        fast_worker_config(),
    ))
}

pub fn memory_context(fetcher: Arc<StubFetcher>) -> (Arc<MemoryBackend>, Arc<CrawlContext>) {
    let backend = Arc::new(MemoryBackend::new());
    let ctx = stub_context(backend.clone(), fetcher);
    (backend, ctx)
}

/// Runs `count` workers until the crawl reports finished and the crawl
/// queue is empty
///
/// Panics if that takes longer than 30 seconds.
pub async fn run_workers(ctx: Arc<CrawlContext>, count: usize, crawl_id: &str) -> Vec<WorkerEvent> {
    let mut handles = Vec::new();
    for _ in 0..count {
        let ctx = ctx.clone();
        let crawl_id = crawl_id.to_string();
        handles.push(tokio::spawn(async move {
            let worker = Worker::new(ctx.clone());
            let state = ctx.crawl_state(&crawl_id);
            let mut events = Vec::new();
            loop {
                match worker.run_once().await.expect("worker failed") {
                    Some(event) => events.push(event),
                    None => {
                        let drained = ctx.queue.size(&ctx.worker.crawl_queue).await.unwrap() == 0;
                        if drained && state.is_finished().await.unwrap() {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(2)).await;
                    }
                }
            }
            events
        }));
    }

    let all = async {
        let mut events = Vec::new();
        for handle in handles {
            events.extend(handle.await.expect("worker task panicked"));
        }
        events
    };
    tokio::time::timeout(Duration::from_secs(30), all)
        .await
        .expect("crawl did not finish")
}
