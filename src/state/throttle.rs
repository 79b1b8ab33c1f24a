//! Per-crawl retrieval throttle driven by the robots.txt crawl delay
//!
//! The throttle is a reservation clock: `robots:next_retrieval` holds the
//! end of the last reserved slot in epoch milliseconds. Each worker
//! atomically advances it by one delay and sleeps until its slot starts.

use crate::state::crawl_state::{keys, CrawlState};
use crate::Result;
use chrono::Utc;
use std::time::Duration;

/// Stores the per-page delay and opens the first slot now
pub async fn initialize(state: &CrawlState, delay_secs: f64) -> Result<()> {
    let delay_ms = (delay_secs.max(0.0) * 1000.0).round() as i64;
    let store = state.store();
    store
        .set(&state.key(keys::ROBOTS_PER_PAGE_DELAY), &delay_ms.to_string())
        .await?;
    store
        .set(
            &state.key(keys::ROBOTS_NEXT_RETRIEVAL),
            &Utc::now().timestamp_millis().to_string(),
        )
        .await?;
    tracing::debug!(
        "Throttle for crawl {} set to {}ms per page",
        state.crawl_id(),
        delay_ms
    );
    Ok(())
}

/// Reserves the next retrieval slot
///
/// # Returns
///
/// How long to wait before fetching, or `None` when the crawl has no
/// throttle configured.
pub async fn reserve_slot(state: &CrawlState) -> Result<Option<Duration>> {
    let store = state.store();
    let delay_ms: i64 = match store
        .get(&state.key(keys::ROBOTS_PER_PAGE_DELAY))
        .await?
        .and_then(|raw| raw.parse().ok())
    {
        Some(delay) => delay,
        None => return Ok(None),
    };

    let next_key = state.key(keys::ROBOTS_NEXT_RETRIEVAL);
    let reserved_end = store.incr_by(&next_key, delay_ms).await?;
    let (wait_ms, catch_up_ms) = next_slot(Utc::now().timestamp_millis(), reserved_end, delay_ms);
    if catch_up_ms > 0 {
        store.incr_by(&next_key, catch_up_ms).await?;
    }

    Ok(Some(Duration::from_millis(wait_ms.max(0) as u64)))
}

/// Computes the wait for a reserved slot
///
/// `reserved_end` is the clock value after this caller's reservation, so its
/// slot starts one delay earlier. A slot in the past means the crawl sat
/// idle: fetch immediately and move the clock up to now.
///
/// # Returns
///
/// `(wait_ms, catch_up_ms)`
pub fn next_slot(now_ms: i64, reserved_end: i64, delay_ms: i64) -> (i64, i64) {
    let start = reserved_end - delay_ms;
    if start >= now_ms {
        (start - now_ms, 0)
    } else {
        (0, now_ms - start)
    }
}
