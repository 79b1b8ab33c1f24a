//! Storage module for shared crawl state and job transport
//!
//! This module provides:
//! - The `StateStore` and `WorkQueue` collaborator traits
//! - An in-memory backend for single-process use and tests
//! - A SQLite backend shared by worker processes on one host
//! - Failure records surfaced through crawl maintenance

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use traits::{StateStore, StoreError, StoreResult, WorkQueue};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Opens (or creates) a SQLite backend
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteBackend)` - Successfully opened backend
/// * `Err(StoreError)` - Failed to open the database or apply the schema
pub fn open_backend(path: &Path) -> StoreResult<SqliteBackend> {
    SqliteBackend::new(path)
}

/// A job that exhausted its retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Queue the job was dequeued from
    pub queue: String,
    /// Job payload as last attempted
    pub payload: Value,
    /// Error from the final attempt
    pub error: String,
    pub failed_at: DateTime<Utc>,
    /// Set when the record has been requeued through maintenance
    pub retried_at: Option<DateTime<Utc>>,
}

impl FailureRecord {
    pub fn new(queue: &str, payload: Value, error: impl Into<String>) -> Self {
        Self {
            queue: queue.to_string(),
            payload,
            error: error.into(),
            failed_at: Utc::now(),
            retried_at: None,
        }
    }

    /// The crawl id carried by the failed payload, if any
    pub fn crawl_id(&self) -> Option<&str> {
        self.payload.get("crawl_id").and_then(Value::as_str)
    }
}
