use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for a Spindle deployment
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Defaults for every crawl started from this configuration
    #[serde(default)]
    pub crawl: CrawlOptions,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// How fetched responses are shared through the response cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Cached responses are only visible to the crawl that fetched them
    #[default]
    CrawlBased,
    /// Cached responses are shared by every crawl on the store
    Full,
}

/// External hash counter bumped once per dispatched page
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EnqueueCounter {
    /// Key namespace in the state store
    pub namespace: String,
    /// Hash key within the namespace
    pub key: String,
    /// Hash field to increment
    pub field: String,
}

/// Options governing a single crawl
///
/// Immutable for the life of the crawl: the starter snapshots them into the
/// statistics hash and every job payload carries a copy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CrawlOptions {
    /// Explicit crawl identity; generated at start when absent
    pub crawl_id: Option<String>,

    /// Maximum number of pages fetched (and jobs queued) for the crawl
    pub crawl_limit: Option<u64>,

    /// Maximum depth; the seed is depth 1
    pub depth_limit: Option<u32>,

    /// Glob patterns for in-scope links; derived from the base url when empty
    pub internal_urls: Vec<String>,

    /// Glob patterns forcing a link out of scope
    pub external_urls: Vec<String>,

    /// Extra depth-1 seeds
    pub seed_urls: Vec<String>,

    /// Whitelist of mime types eligible for expansion and dispatch
    pub valid_mime_types: Vec<String>,

    /// Mime types considered textual content
    pub text_mime_types: Vec<String>,

    /// Response cache lifetime in seconds; 0 disables the cache
    pub cache: u64,

    pub cache_type: CacheMode,

    /// Request timeout in seconds
    pub timeout: u64,

    pub follow_redirects: bool,

    pub redirect_limit: u32,

    pub user_agent: String,

    pub proxy_addr: Option<String>,
    pub proxy_port: Option<u16>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,

    /// Basic auth credentials
    pub username: Option<String>,
    pub password: Option<String>,

    /// Refuse urls that robots.txt disallows
    pub obey_robots: bool,

    /// Throttle retrievals by the robots.txt crawl delay
    pub respect_robots_delay: bool,

    /// Propagate fetch errors instead of recording error content
    pub raise_exceptions: bool,

    pub store_response_codes: bool,

    /// Dispatch content by calling the registered handler directly
    pub direct_call_process_job: bool,

    /// Dispatch content with a base64 body through the encoding-safe queue
    pub use_encoding_safe_process_job: bool,

    pub processing_queue: String,

    pub crawl_finished_queue: String,

    /// Opaque store connection parameters, echoed to downstream consumers
    pub store_options: BTreeMap<String, String>,

    pub enqueue_counter: Option<EnqueueCounter>,

    pub source_id: Option<String>,

    /// Caller data bag
    pub data: BTreeMap<String, Value>,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            crawl_id: None,
            crawl_limit: None,
            depth_limit: None,
            internal_urls: Vec::new(),
            external_urls: Vec::new(),
            seed_urls: Vec::new(),
            valid_mime_types: vec!["*/*".to_string()],
            text_mime_types: vec!["text/*".to_string(), "application/xhtml+xml".to_string()],
            cache: 300,
            cache_type: CacheMode::CrawlBased,
            timeout: 30,
            follow_redirects: true,
            redirect_limit: 10,
            user_agent: format!("spindle/{}", env!("CARGO_PKG_VERSION")),
            proxy_addr: None,
            proxy_port: None,
            proxy_username: None,
            proxy_password: None,
            username: None,
            password: None,
            obey_robots: false,
            respect_robots_delay: false,
            raise_exceptions: false,
            store_response_codes: false,
            direct_call_process_job: false,
            use_encoding_safe_process_job: false,
            processing_queue: "spindle_process_job".to_string(),
            crawl_finished_queue: "spindle_finished_job".to_string(),
            store_options: BTreeMap::new(),
            enqueue_counter: None,
            source_id: None,
            data: BTreeMap::new(),
        }
    }
}

impl CrawlOptions {
    /// Request timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// True while `depth` is within the configured depth limit
    pub fn within_depth_limit(&self, depth: u32) -> bool {
        self.depth_limit.map_or(true, |limit| depth <= limit)
    }

    /// True while `count` is strictly below the configured crawl limit
    pub fn below_crawl_limit(&self, count: i64) -> bool {
        self.crawl_limit
            .map_or(true, |limit| count < i64::try_from(limit).unwrap_or(i64::MAX))
    }
}

/// Worker process configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Namespace prefix for all shared crawl state keys
    pub key_prefix: String,

    /// Work queue carrying crawl jobs
    pub crawl_queue: String,

    /// Attempts per job before it is abandoned to the failure store
    pub max_attempts: u32,

    /// Forcibly terminate a job running longer than this
    pub job_timeout_secs: Option<u64>,

    /// Idle wait between empty dequeues (milliseconds)
    pub poll_interval_ms: u64,

    /// Give up acquiring the completion lock after this long (milliseconds)
    pub lock_timeout_ms: u64,

    /// Lock lease; a holder that dies releases it after this long (milliseconds)
    pub lock_ttl_ms: u64,

    /// Retry interval while the lock is held elsewhere (milliseconds)
    pub lock_poll_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            key_prefix: "spindle".to_string(),
            crawl_queue: "spindle_crawl_job".to_string(),
            max_attempts: 3,
            job_timeout_secs: None,
            poll_interval_ms: 500,
            lock_timeout_ms: 30_000,
            lock_ttl_ms: 30_000,
            lock_poll_ms: 10,
        }
    }
}

impl WorkerConfig {
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database shared by starters and workers
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "./spindle.db".to_string(),
        }
    }
}
