//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the `StateStore`
//! and `WorkQueue` traits. Several worker processes may open the same
//! database file; every read-modify-write runs inside an immediate
//! transaction so it is atomic across processes as well as tasks.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{StateStore, StoreError, StoreResult, WorkQueue};
use crate::storage::FailureRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// How long a connection waits on another process's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite storage backend
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Creates a new SqliteBackend instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteBackend)` - Successfully opened/created database
    /// * `Err(StoreError)` - Failed to open database
    pub fn new(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing and single-process runs)
    pub fn new_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    /// Runs `f` inside an immediate (write-locked) transaction
    fn immediate<T>(&self, f: impl FnOnce(&Transaction<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

fn sql_int(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn parse_integer(key: &str, raw: Option<String>) -> StoreResult<i64> {
    match raw {
        None => Ok(0),
        Some(raw) => raw.parse().map_err(|_| StoreError::InvalidValue {
            key: key.to_string(),
            message: format!("expected integer, found '{}'", raw),
        }),
    }
}

fn parse_time(key: &str, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

fn read_hash_field(tx: &Transaction<'_>, key: &str, field: &str) -> StoreResult<Option<String>> {
    Ok(tx
        .query_row(
            "SELECT value FROM hash_fields WHERE key = ?1 AND field = ?2",
            params![key, field],
            |row| row.get(0),
        )
        .optional()?)
}

fn write_hash_field(tx: &Transaction<'_>, key: &str, field: &str, value: &str) -> StoreResult<()> {
    tx.execute(
        "INSERT INTO hash_fields (key, field, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
        params![key, field, value],
    )?;
    Ok(())
}

/// Id of the failure record at `index` in insertion order
fn failure_id_at(tx: &Transaction<'_>, index: usize) -> StoreResult<i64> {
    tx.query_row(
        "SELECT id FROM failures ORDER BY id LIMIT 1 OFFSET ?1",
        params![sql_int(index)],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(StoreError::FailureNotFound(index))
}

#[async_trait]
impl StateStore for SqliteBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.connection()?;
        Ok(conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool> {
        let conn = self.connection()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(inserted == 1)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.immediate(|tx| {
            tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            tx.execute("DELETE FROM set_members WHERE key = ?1", params![key])?;
            tx.execute("DELETE FROM hash_fields WHERE key = ?1", params![key])?;
            Ok(())
        })
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        self.immediate(|tx| {
            let current: Option<String> = tx
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?;
            let next = parse_integer(key, current)? + delta;
            tx.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, next.to_string()],
            )?;
            Ok(next)
        })
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        let conn = self.connection()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO set_members (key, member) VALUES (?1, ?2)",
            params![key, member],
        )?;
        Ok(inserted == 1)
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let conn = self.connection()?;
        let removed = conn.execute(
            "DELETE FROM set_members WHERE key = ?1 AND member = ?2",
            params![key, member],
        )?;
        Ok(removed == 1)
    }

    async fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool> {
        let conn = self.connection()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM set_members WHERE key = ?1 AND member = ?2",
                params![key, member],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn set_len(&self, key: &str) -> StoreResult<u64> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM set_members WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let conn = self.connection()?;
        let mut stmt =
            conn.prepare("SELECT member FROM set_members WHERE key = ?1 ORDER BY member")?;
        let members = stmt
            .query_map(params![key], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(members)
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let conn = self.connection()?;
        Ok(conn
            .query_row(
                "SELECT value FROM hash_fields WHERE key = ?1 AND field = ?2",
                params![key, field],
                |row| row.get(0),
            )
            .optional()?)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.immediate(|tx| write_hash_field(tx, key, field, value))
    }

    async fn hash_incr_by(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        self.immediate(|tx| {
            let next = parse_integer(key, read_hash_field(tx, key, field)?)? + delta;
            write_hash_field(tx, key, field, &next.to_string())?;
            Ok(next)
        })
    }

    async fn hash_set_min(&self, key: &str, field: &str, value: i64) -> StoreResult<i64> {
        self.immediate(|tx| {
            let current = read_hash_field(tx, key, field)?
                .map(|raw| parse_integer(key, Some(raw)))
                .transpose()?;
            match current {
                Some(existing) if existing <= value => Ok(existing),
                _ => {
                    write_hash_field(tx, key, field, &value.to_string())?;
                    Ok(value)
                }
            }
        })
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT field, value FROM hash_fields WHERE key = ?1")?;
        let fields = stmt
            .query_map(params![key], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<BTreeMap<String, String>, _>>()?;
        Ok(fields)
    }

    async fn try_lock(&self, name: &str, owner: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));

        self.immediate(|tx| {
            let holder: Option<(String, i64)> = tx
                .query_row(
                    "SELECT owner, expires_at FROM locks WHERE name = ?1",
                    params![name],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            if let Some((holder, holder_expires_at)) = holder {
                if holder != owner && holder_expires_at > now {
                    return Ok(false);
                }
            }

            tx.execute(
                "INSERT INTO locks (name, owner, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET owner = excluded.owner, expires_at = excluded.expires_at",
                params![name, owner, expires_at],
            )?;
            Ok(true)
        })
    }

    async fn unlock(&self, name: &str, owner: &str) -> StoreResult<bool> {
        let conn = self.connection()?;
        let removed = conn.execute(
            "DELETE FROM locks WHERE name = ?1 AND owner = ?2",
            params![name, owner],
        )?;
        Ok(removed == 1)
    }
}

#[async_trait]
impl WorkQueue for SqliteBackend {
    async fn enqueue(&self, queue: &str, payload: &Value) -> StoreResult<()> {
        let body = serde_json::to_string(payload)?;
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO jobs (queue, payload, enqueued_at) VALUES (?1, ?2, ?3)",
            params![queue, body, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn dequeue(&self, queue: &str) -> StoreResult<Option<Value>> {
        let body = self.immediate(|tx| {
            let job: Option<(i64, String)> = tx
                .query_row(
                    "SELECT id, payload FROM jobs WHERE queue = ?1 ORDER BY id LIMIT 1",
                    params![queue],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            if let Some((id, _)) = &job {
                tx.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
            }
            Ok(job.map(|(_, body)| body))
        })?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn size(&self, queue: &str) -> StoreResult<u64> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE queue = ?1",
            params![queue],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    async fn record_failure(&self, record: FailureRecord) -> StoreResult<()> {
        let payload = serde_json::to_string(&record.payload)?;
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO failures (queue, payload, error, failed_at, retried_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.queue,
                payload,
                record.error,
                record.failed_at.to_rfc3339(),
                record.retried_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    async fn failures(&self, start: usize, count: usize) -> StoreResult<Vec<FailureRecord>> {
        let rows = {
            let conn = self.connection()?;
            let mut stmt = conn.prepare(
                "SELECT queue, payload, error, failed_at, retried_at FROM failures
                 ORDER BY id LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map(params![sql_int(count), sql_int(start)], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(|(queue, payload, error, failed_at, retried_at)| {
                Ok(FailureRecord {
                    payload: serde_json::from_str(&payload)?,
                    failed_at: parse_time("failed_at", &failed_at)?,
                    retried_at: retried_at
                        .map(|raw| parse_time("retried_at", &raw))
                        .transpose()?,
                    queue,
                    error,
                })
            })
            .collect()
    }

    async fn failure_count(&self) -> StoreResult<u64> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM failures", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    async fn requeue_failure(&self, index: usize) -> StoreResult<()> {
        self.immediate(|tx| {
            let id = failure_id_at(tx, index)?;
            let now = Utc::now().to_rfc3339();
            tx.execute(
                "INSERT INTO jobs (queue, payload, enqueued_at)
                 SELECT queue, payload, ?2 FROM failures WHERE id = ?1",
                params![id, now],
            )?;
            tx.execute(
                "UPDATE failures SET retried_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            Ok(())
        })
    }

    async fn remove_failure(&self, index: usize) -> StoreResult<()> {
        self.immediate(|tx| {
            let id = failure_id_at(tx, index)?;
            tx.execute("DELETE FROM failures WHERE id = ?1", params![id])?;
            Ok(())
        })
    }
}
