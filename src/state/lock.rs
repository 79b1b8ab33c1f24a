use crate::config::WorkerConfig;
use crate::storage::StateStore;
use crate::{Result, SpindleError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Timing for acquiring and holding a named lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// Give up after waiting this long
    pub timeout: Duration,
    /// Lease length; an abandoned lock frees itself after this long
    pub ttl: Duration,
    /// Wait between attempts
    pub poll: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for LockSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.lock_timeout_ms),
            ttl: Duration::from_millis(config.lock_ttl_ms),
            poll: Duration::from_millis(config.lock_poll_ms),
        }
    }
}

/// A held mutual-exclusion lock in the shared store
///
/// Must be released explicitly; a holder that dies leaves the lease to
/// expire on its own.
pub struct CrawlLock {
    store: Arc<dyn StateStore>,
    name: String,
    owner: String,
}

impl CrawlLock {
    /// Polls until the lock is acquired or the timeout elapses
    pub async fn acquire(
        store: Arc<dyn StateStore>,
        name: &str,
        settings: &LockSettings,
    ) -> Result<Self> {
        let owner = uuid::Uuid::new_v4().to_string();
        let deadline = Instant::now() + settings.timeout;

        loop {
            if store.try_lock(name, &owner, settings.ttl).await? {
                tracing::trace!("Acquired lock {} as {}", name, owner);
                return Ok(Self {
                    store,
                    name: name.to_string(),
                    owner,
                });
            }

            if Instant::now() >= deadline {
                return Err(SpindleError::LockTimeout {
                    name: name.to_string(),
                });
            }

            tokio::time::sleep(settings.poll).await;
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn release(self) -> Result<()> {
        if !self.store.unlock(&self.name, &self.owner).await? {
            tracing::warn!("Lock {} expired before release", self.name);
        } else {
            tracing::trace!("Released lock {}", self.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn fast_settings() -> LockSettings {
        LockSettings {
            timeout: Duration::from_millis(50),
            ttl: Duration::from_secs(30),
            poll: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryBackend::new());
        let lock = CrawlLock::acquire(store.clone(), "l", &fast_settings())
            .await
            .unwrap();
        assert_eq!(lock.name(), "l");
        lock.release().await.unwrap();

        let again = CrawlLock::acquire(store, "l", &fast_settings()).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_contended_lock_times_out() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryBackend::new());
        let _held = CrawlLock::acquire(store.clone(), "l", &fast_settings())
            .await
            .unwrap();

        let result = CrawlLock::acquire(store, "l", &fast_settings()).await;
        assert!(matches!(result, Err(SpindleError::LockTimeout { .. })));
    }

    #[tokio::test]
    async fn test_waiter_acquires_after_release() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryBackend::new());
        let held = CrawlLock::acquire(store.clone(), "l", &fast_settings())
            .await
            .unwrap();

        let settings = LockSettings {
            timeout: Duration::from_secs(5),
            ..fast_settings()
        };
        let waiter = tokio::spawn({
            let store = store.clone();
            async move { CrawlLock::acquire(store, "l", &settings).await.is_ok() }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        held.release().await.unwrap();
        assert!(waiter.await.unwrap());
    }
}
