//! Storage traits and error types
//!
//! This module defines the two collaborator seams every backend provides:
//! a namespaced key/set/hash store with atomic primitives, and a durable
//! at-least-once work queue with a failure store.

use crate::storage::FailureRecord;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned: {0}")]
    Poisoned(String),

    #[error("Invalid value at {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failure record not found at index {0}")]
    FailureNotFound(usize),
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared state store
///
/// Every operation is atomic with respect to every other caller of the same
/// backend, including callers in other processes for shared backends.
/// Adding an existing set member or rewriting an existing hash field is a
/// no-op as far as other readers can tell.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads a scalar value
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes a scalar value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Writes a scalar value only if the key is unset
    ///
    /// # Returns
    ///
    /// `true` if this call wrote the value
    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool>;

    /// Removes a key of any kind
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Atomically adds `delta` to an integer scalar (missing keys count as 0)
    ///
    /// # Returns
    ///
    /// The value after the increment
    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64>;

    /// Adds a member to a set
    ///
    /// # Returns
    ///
    /// `true` if the member was not already present
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Removes a member from a set, returning whether it was present
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn set_len(&self, key: &str) -> StoreResult<u64>;

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Atomically adds `delta` to an integer hash field
    async fn hash_incr_by(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    /// Stores `value` in an integer hash field only if it is smaller than
    /// the current value (or the field is unset)
    ///
    /// # Returns
    ///
    /// The field value after the call
    async fn hash_set_min(&self, key: &str, field: &str, value: i64) -> StoreResult<i64>;

    async fn hash_get_all(&self, key: &str) -> StoreResult<BTreeMap<String, String>>;

    /// Tries to acquire a named lock for `owner`
    ///
    /// An expired lease can be taken over. Re-acquiring a lock already held
    /// by the same owner renews it.
    async fn try_lock(&self, name: &str, owner: &str, ttl: Duration) -> StoreResult<bool>;

    /// Releases a lock held by `owner`, returning whether it was held
    async fn unlock(&self, name: &str, owner: &str) -> StoreResult<bool>;
}

/// Durable at-least-once work queue
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Appends a job payload to the named queue
    async fn enqueue(&self, queue: &str, payload: &Value) -> StoreResult<()>;

    /// Removes and returns the oldest payload of the named queue
    async fn dequeue(&self, queue: &str) -> StoreResult<Option<Value>>;

    /// Number of payloads waiting in the named queue
    async fn size(&self, queue: &str) -> StoreResult<u64>;

    /// Appends a permanently failed job to the failure store
    async fn record_failure(&self, record: FailureRecord) -> StoreResult<()>;

    /// Lists failure records, oldest first
    ///
    /// # Arguments
    ///
    /// * `start` - Index of the first record to return
    /// * `count` - Maximum number of records to return
    async fn failures(&self, start: usize, count: usize) -> StoreResult<Vec<FailureRecord>>;

    async fn failure_count(&self) -> StoreResult<u64>;

    /// Re-enqueues the payload of the failure record at `index` on its
    /// original queue and stamps the record's `retried_at`
    async fn requeue_failure(&self, index: usize) -> StoreResult<()>;

    /// Deletes the failure record at `index`; later records shift down
    async fn remove_failure(&self, index: usize) -> StoreResult<()>;
}
