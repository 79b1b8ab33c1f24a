//! Crawler module: the job pipeline and its collaborators
//!
//! This module contains the crawl coordination logic, including:
//! - The job payload and the normalized content record
//! - HTTP fetching with manual redirects and a response cache
//! - HTML link extraction
//! - The per-job state machine, crawl start and the worker loop
//! - Maintenance queries over failed jobs

mod cache;
mod content;
mod context;
mod dispatch;
mod fetcher;
mod maintenance;
mod parser;
mod processor;
mod request;
mod starter;
mod worker;

pub use cache::{cache_key, CachingFetcher};
pub use content::{
    is_text_type, split_content_type, Content, REDIRECT_ERROR, SERVER_DOWN, SOCKET_ERROR,
};
pub use context::{ContentHandler, CrawlContext};
pub use dispatch::{
    content_payload, decode_encoding_safe, finished_payload, send_to_processing_queue,
    DispatchMode, ENCODING_SAFE_QUEUE,
};
pub use fetcher::{build_http_client, Fetcher, HttpFetcher};
pub use maintenance::{CrawlMaintenance, QueueStats, FAILURE_SCAN_WINDOW};
pub use parser::{extract_page, ExtractedPage};
pub use processor::{JobOutcome, JobProcessor, JobReport};
pub use request::ContentRequest;
pub use starter::CrawlStarter;
pub use worker::{RetryPolicy, Worker, WorkerEvent};
