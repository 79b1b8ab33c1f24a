//! State module for shared crawl progress
//!
//! This module provides the per-crawl view of the shared state store.
//!
//! # Components
//!
//! - `CrawlState`: counters, sets and hashes namespaced by crawl id
//! - `CrawlLock`: named mutual exclusion held only for the completion check
//! - `throttle`: robots crawl-delay reservation clock
//! - `CrawlStatistics`: snapshot sent with the completion notification

mod crawl_state;
mod lock;
pub mod stats;
pub mod throttle;

// Re-export main types
pub use crawl_state::{keys, CrawlState};
pub use lock::{CrawlLock, LockSettings};
pub use stats::{print_statistics, CrawlStatistics};
