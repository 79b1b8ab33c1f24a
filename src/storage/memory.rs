//! In-memory storage backend
//!
//! Shares state between every worker task in one process. All state lives
//! behind a single mutex, so each operation is trivially atomic.

use crate::storage::traits::{StateStore, StoreError, StoreResult, WorkQueue};
use crate::storage::FailureRecord;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, String>,
    sets: HashMap<String, BTreeSet<String>>,
    hashes: HashMap<String, BTreeMap<String, String>>,
    locks: HashMap<String, (String, Instant)>,
    queues: HashMap<String, VecDeque<Value>>,
    failures: Vec<FailureRecord>,
}

/// Process-local backend implementing both `StateStore` and `WorkQueue`
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

fn parse_integer(key: &str, value: Option<&String>) -> StoreResult<i64> {
    match value {
        None => Ok(0),
        Some(raw) => raw.parse().map_err(|_| StoreError::InvalidValue {
            key: key.to_string(),
            message: format!("expected integer, found '{}'", raw),
        }),
    }
}

#[async_trait]
impl StateStore for MemoryBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.state()?.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.state()?
            .values
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut state = self.state()?;
        if state.values.contains_key(key) {
            return Ok(false);
        }
        state.values.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut state = self.state()?;
        state.values.remove(key);
        state.sets.remove(key);
        state.hashes.remove(key);
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut state = self.state()?;
        let next = parse_integer(key, state.values.get(key))? + delta;
        state.values.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .state()?
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .state()?
            .sets
            .get_mut(key)
            .map_or(false, |set| set.remove(member)))
    }

    async fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .state()?
            .sets
            .get(key)
            .map_or(false, |set| set.contains(member)))
    }

    async fn set_len(&self, key: &str) -> StoreResult<u64> {
        Ok(self.state()?.sets.get(key).map_or(0, |set| set.len() as u64))
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .state()?
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self
            .state()?
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.state()?
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_incr_by(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut state = self.state()?;
        let hash = state.hashes.entry(key.to_string()).or_default();
        let next = parse_integer(key, hash.get(field))? + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hash_set_min(&self, key: &str, field: &str, value: i64) -> StoreResult<i64> {
        let mut state = self.state()?;
        let hash = state.hashes.entry(key.to_string()).or_default();
        let current = hash
            .get(field)
            .map(|raw| parse_integer(key, Some(raw)))
            .transpose()?;
        match current {
            Some(existing) if existing <= value => Ok(existing),
            _ => {
                hash.insert(field.to_string(), value.to_string());
                Ok(value)
            }
        }
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        Ok(self.state()?.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn try_lock(&self, name: &str, owner: &str, ttl: Duration) -> StoreResult<bool> {
        let mut state = self.state()?;
        let now = Instant::now();
        if let Some((holder, expires_at)) = state.locks.get(name) {
            if holder != owner && *expires_at > now {
                return Ok(false);
            }
        }
        state
            .locks
            .insert(name.to_string(), (owner.to_string(), now + ttl));
        Ok(true)
    }

    async fn unlock(&self, name: &str, owner: &str) -> StoreResult<bool> {
        let mut state = self.state()?;
        match state.locks.get(name) {
            Some((holder, _)) if holder == owner => {
                state.locks.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryBackend {
    async fn enqueue(&self, queue: &str, payload: &Value) -> StoreResult<()> {
        self.state()?
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(payload.clone());
        Ok(())
    }

    async fn dequeue(&self, queue: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .state()?
            .queues
            .get_mut(queue)
            .and_then(VecDeque::pop_front))
    }

    async fn size(&self, queue: &str) -> StoreResult<u64> {
        Ok(self
            .state()?
            .queues
            .get(queue)
            .map_or(0, |q| q.len() as u64))
    }

    async fn record_failure(&self, record: FailureRecord) -> StoreResult<()> {
        self.state()?.failures.push(record);
        Ok(())
    }

    async fn failures(&self, start: usize, count: usize) -> StoreResult<Vec<FailureRecord>> {
        Ok(self
            .state()?
            .failures
            .iter()
            .skip(start)
            .take(count)
            .cloned()
            .collect())
    }

    async fn failure_count(&self) -> StoreResult<u64> {
        Ok(self.state()?.failures.len() as u64)
    }

    async fn requeue_failure(&self, index: usize) -> StoreResult<()> {
        let mut state = self.state()?;
        let (queue, payload) = {
            let record = state
                .failures
                .get_mut(index)
                .ok_or(StoreError::FailureNotFound(index))?;
            record.retried_at = Some(Utc::now());
            (record.queue.clone(), record.payload.clone())
        };
        state.queues.entry(queue).or_default().push_back(payload);
        Ok(())
    }

    async fn remove_failure(&self, index: usize) -> StoreResult<()> {
        let mut state = self.state()?;
        if index >= state.failures.len() {
            return Err(StoreError::FailureNotFound(index));
        }
        state.failures.remove(index);
        Ok(())
    }
}
