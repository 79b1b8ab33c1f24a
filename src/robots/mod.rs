//! Robots.txt handling module
//!
//! This module provides functionality for fetching, parsing, and caching
//! robots.txt files, behind the `RobotsSource` collaborator trait. It feeds
//! the per-crawl throttle (crawl delay) and `obey_robots` url refusal.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsCache};
pub use parser::{product_token, RobotsRules};

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// Crawl delay in seconds when robots.txt does not specify one
pub const DEFAULT_CRAWL_DELAY: f64 = 0.5;

/// Source of robots.txt policy for a site
#[async_trait]
pub trait RobotsSource: Send + Sync {
    /// Crawl delay in seconds for the site of `base_url`
    ///
    /// Falls back to [`DEFAULT_CRAWL_DELAY`] when the site sets none.
    async fn crawl_delay(&self, base_url: &Url, user_agent: &str) -> Result<f64>;

    /// Whether `url` may be fetched by `user_agent`
    async fn is_allowed(&self, url: &Url, user_agent: &str) -> Result<bool>;
}

/// Location of the robots.txt governing `url`
pub fn robots_url(url: &Url) -> Option<Url> {
    let mut robots = url.clone();
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);
    if robots.cannot_be_a_base() || robots.host_str().is_none() {
        return None;
    }
    Some(robots)
}

/// Fetches robots.txt over HTTP, caching rules per origin
pub struct HttpRobots {
    client: reqwest::Client,
    cache: RobotsCache,
}

impl HttpRobots {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            cache: RobotsCache::new(),
        }
    }

    /// Fetches and parses robots.txt for the origin of `url`
    ///
    /// Any failure to obtain robots.txt is treated as "no rules".
    pub async fn rules_for(&self, url: &Url, user_agent: &str) -> RobotsRules {
        let origin = url.origin().ascii_serialization();
        if let Some(rules) = self.cache.get(&origin) {
            return rules;
        }

        let rules = match robots_url(url) {
            Some(location) => self.fetch(&location, user_agent).await,
            None => RobotsRules::allow_all(),
        };
        self.cache.insert(&origin, rules.clone());
        rules
    }

    async fn fetch(&self, location: &Url, user_agent: &str) -> RobotsRules {
        let response = match self
            .client
            .get(location.clone())
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Failed to fetch {}: {}", location, e);
                return RobotsRules::allow_all();
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("No robots.txt at {} ({})", location, status);
            return RobotsRules::allow_all();
        }

        match response.text().await {
            Ok(body) => RobotsRules::parse(&body),
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", location, e);
                RobotsRules::allow_all()
            }
        }
    }
}

#[async_trait]
impl RobotsSource for HttpRobots {
    async fn crawl_delay(&self, base_url: &Url, user_agent: &str) -> Result<f64> {
        Ok(self
            .rules_for(base_url, user_agent)
            .await
            .crawl_delay(user_agent)
            .unwrap_or(DEFAULT_CRAWL_DELAY))
    }

    async fn is_allowed(&self, url: &Url, user_agent: &str) -> Result<bool> {
        Ok(self
            .rules_for(url, user_agent)
            .await
            .is_allowed(url.as_str(), user_agent))
    }
}
