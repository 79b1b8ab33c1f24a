use crate::config::WorkerConfig;
use crate::crawler::cache::CachingFetcher;
use crate::crawler::fetcher::{Fetcher, HttpFetcher};
use crate::robots::{HttpRobots, RobotsSource};
use crate::state::{CrawlState, LockSettings};
use crate::storage::{StateStore, WorkQueue};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Direct-call target for dispatched content
///
/// Registered on the context under a processing queue name and invoked
/// synchronously when a crawl sets `direct_call_process_job`.
#[async_trait]
pub trait ContentHandler: Send + Sync {
    async fn process(&self, payload: Value) -> Result<()>;
}

/// Everything a job needs besides its own payload
///
/// Built once per worker process and shared by every job it runs; there is
/// no process-wide crawl handle.
pub struct CrawlContext {
    pub store: Arc<dyn StateStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub fetcher: Arc<dyn Fetcher>,
    pub robots: Arc<dyn RobotsSource>,
    pub worker: WorkerConfig,
    handlers: HashMap<String, Arc<dyn ContentHandler>>,
}

impl CrawlContext {
    pub fn new(
        store: Arc<dyn StateStore>,
        queue: Arc<dyn WorkQueue>,
        fetcher: Arc<dyn Fetcher>,
        robots: Arc<dyn RobotsSource>,
        worker: WorkerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            fetcher,
            robots,
            worker,
            handlers: HashMap::new(),
        }
    }

    /// A context over one backend serving as both store and queue, fetching
    /// over HTTP through the response cache
    pub fn with_backend<B>(backend: Arc<B>, worker: WorkerConfig) -> Result<Self>
    where
        B: StateStore + WorkQueue + 'static,
    {
        let store: Arc<dyn StateStore> = backend.clone();
        let fetcher = CachingFetcher::new(
            Arc::new(HttpFetcher::new()),
            store.clone(),
            &worker.key_prefix,
        );
        let robots = HttpRobots::new(Duration::from_secs(30))?;

        Ok(Self::new(
            store,
            backend,
            Arc::new(fetcher),
            Arc::new(robots),
            worker,
        ))
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_robots(mut self, robots: Arc<dyn RobotsSource>) -> Self {
        self.robots = robots;
        self
    }

    /// Registers a direct-call handler under a processing queue name
    pub fn with_handler(mut self, name: &str, handler: Arc<dyn ContentHandler>) -> Self {
        self.handlers.insert(name.to_string(), handler);
        self
    }

    pub fn handler(&self, name: &str) -> Option<&Arc<dyn ContentHandler>> {
        self.handlers.get(name)
    }

    pub fn crawl_state(&self, crawl_id: &str) -> CrawlState {
        CrawlState::new(self.store.clone(), &self.worker.key_prefix, crawl_id)
    }

    pub fn lock_settings(&self) -> LockSettings {
        LockSettings::from(&self.worker)
    }
}
