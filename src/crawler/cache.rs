//! Response cache in the shared store
//!
//! Cached responses are keyed by url digest under either the crawl's own
//! namespace (`crawl_based`) or a store-wide one (`full`), and expire after
//! the crawl's `cache` lifetime. Error content is never cached.

use crate::config::{CacheMode, CrawlOptions};
use crate::crawler::content::Content;
use crate::crawler::fetcher::Fetcher;
use crate::crawler::request::ContentRequest;
use crate::storage::StateStore;
use crate::url::url_digest;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
struct CachedResponse {
    /// `None` when the lifetime is too long to represent
    expires_at: Option<DateTime<Utc>>,
    content: Content,
}

impl CachedResponse {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

fn expiry(now: DateTime<Utc>, lifetime_secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(lifetime_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
}

/// Store key for a cached response
pub fn cache_key(prefix: &str, request: &ContentRequest) -> String {
    let digest = url_digest(&request.url);
    match request.options.cache_type {
        CacheMode::CrawlBased => format!("{}:{}:cache:{}", prefix, request.crawl_id, digest),
        CacheMode::Full => format!("{}:cache:{}", prefix, digest),
    }
}

fn caching_enabled(options: &CrawlOptions) -> bool {
    options.cache > 0
}

/// Wraps a fetcher with the response cache
pub struct CachingFetcher {
    inner: Arc<dyn Fetcher>,
    store: Arc<dyn StateStore>,
    prefix: String,
}

impl CachingFetcher {
    pub fn new(inner: Arc<dyn Fetcher>, store: Arc<dyn StateStore>, prefix: &str) -> Self {
        Self {
            inner,
            store,
            prefix: prefix.to_string(),
        }
    }

    async fn lookup(&self, key: &str) -> Result<Option<Content>> {
        let raw = match self.store.get(key).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        match serde_json::from_str::<CachedResponse>(&raw) {
            Ok(cached) if cached.is_fresh(Utc::now()) => Ok(Some(cached.content)),
            Ok(_) => {
                self.store.delete(key).await?;
                Ok(None)
            }
            Err(e) => {
                tracing::warn!("Discarding unreadable cache entry {}: {}", key, e);
                self.store.delete(key).await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Fetcher for CachingFetcher {
    async fn fetch(&self, request: &ContentRequest) -> Result<Content> {
        if !caching_enabled(&request.options) {
            return self.inner.fetch(request).await;
        }

        let key = cache_key(&self.prefix, request);
        if let Some(content) = self.lookup(&key).await? {
            tracing::debug!("Cache hit for {}", request.url);
            return Ok(content);
        }

        let content = self.inner.fetch(request).await?;
        if !content.is_error() {
            let cached = CachedResponse {
                expires_at: expiry(Utc::now(), request.options.cache),
                content,
            };
            self.store
                .set(&key, &serde_json::to_string(&cached)?)
                .await?;
            return Ok(cached.content);
        }
        Ok(content)
    }
}
