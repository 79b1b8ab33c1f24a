//! Integration tests for the coordination protocol
//!
//! These run whole crawls against a stub fetcher with several concurrent
//! workers and check the counters, the completion notification and the
//! retry and maintenance paths.

mod common;

use common::{memory_context, run_workers, stub_context, tree_site, StubFetcher, SITE};
use spindle::crawler::{JobOutcome, WorkerEvent};
use spindle::{
    CrawlMaintenance, CrawlOptions, CrawlStarter, CrawlState, JobProcessor, SqliteBackend,
    WorkQueue,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn options(crawl_id: &str) -> CrawlOptions {
    let mut options = CrawlOptions::default();
    options.crawl_id = Some(crawl_id.to_string());
    options.cache = 0;
    options
}

fn root() -> String {
    format!("{}/", SITE)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_finish_exactly_once() {
    for round in 0..5 {
        let crawl_id = format!("race-{}", round);
        let fetcher = Arc::new(StubFetcher::new(tree_site(5)).with_delay(Duration::from_millis(1)));
        let (backend, ctx) = memory_context(fetcher.clone());

        CrawlStarter::new(ctx.clone())
            .start(&root(), options(&crawl_id))
            .await
            .expect("start failed");
        let events = run_workers(ctx.clone(), 8, &crawl_id).await;

        let state = ctx.crawl_state(&crawl_id);
        assert_eq!(state.finished_enqueued_count().await.unwrap(), 1);
        assert_eq!(backend.size("spindle_finished_job").await.unwrap(), 1);
        assert_eq!(state.crawl_count().await.unwrap(), 31);
        assert_eq!(state.queue_count().await.unwrap(), 31);
        assert_eq!(state.running_count().await.unwrap(), 0);

        let finishers = events
            .iter()
            .filter(|event| matches!(event, WorkerEvent::Completed(report) if report.finished))
            .count();
        assert_eq!(finishers, 1);

        let mut fetched = fetcher.fetched();
        fetched.sort();
        fetched.dedup();
        assert_eq!(fetched.len(), 31);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queue_count_never_below_crawl_count() {
    let fetcher = Arc::new(StubFetcher::new(tree_site(6)).with_delay(Duration::from_millis(1)));
    let (_, ctx) = memory_context(fetcher);
    CrawlStarter::new(ctx.clone())
        .start(&root(), options("conserve"))
        .await
        .expect("start failed");

    let done = Arc::new(AtomicBool::new(false));
    let watcher = {
        let state = ctx.crawl_state("conserve");
        let done = done.clone();
        tokio::spawn(async move {
            let mut samples = 0;
            while !done.load(Ordering::SeqCst) {
                let crawled = state.crawl_count().await.unwrap();
                let queued = state.queue_count().await.unwrap();
                assert!(queued >= crawled, "queue {} < crawl {}", queued, crawled);
                samples += 1;
                tokio::task::yield_now().await;
            }
            samples
        })
    };

    run_workers(ctx.clone(), 6, "conserve").await;
    done.store(true, Ordering::SeqCst);
    assert!(watcher.await.expect("watcher panicked") > 0);

    let state = ctx.crawl_state("conserve");
    assert_eq!(state.running_count().await.unwrap(), 0);
    assert_eq!(
        state.queue_count().await.unwrap(),
        state.crawl_count().await.unwrap()
    );
}

#[tokio::test]
async fn test_redelivered_job_is_idempotent() {
    let fetcher = Arc::new(StubFetcher::new(tree_site(3)));
    let (backend, ctx) = memory_context(fetcher.clone());
    let seed = CrawlStarter::new(ctx.clone())
        .start(&root(), options("dup"))
        .await
        .expect("start failed");
    backend.dequeue("spindle_crawl_job").await.unwrap();

    let processor = JobProcessor::new(ctx.clone());
    let first = processor.process(seed.clone()).await.unwrap();
    assert_eq!(first.outcome, JobOutcome::Processed);
    assert_eq!(first.queued_links, 3);

    let state = ctx.crawl_state("dup");
    let queue_before = state.queue_count().await.unwrap();
    let crawl_before = state.crawl_count().await.unwrap();
    let jobs_before = backend.size("spindle_crawl_job").await.unwrap();

    let second = processor.process(seed).await.unwrap();

    assert_eq!(second.outcome, JobOutcome::Duplicate);
    assert_eq!(state.queue_count().await.unwrap(), queue_before);
    assert_eq!(state.crawl_count().await.unwrap(), crawl_before);
    assert_eq!(backend.size("spindle_crawl_job").await.unwrap(), jobs_before);
    assert_eq!(fetcher.fetched().len(), 1);
    assert_eq!(state.running_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_retry_ceiling_then_visible_in_maintenance() {
    let broken = format!("{}/s1", SITE);
    let fetcher = Arc::new(StubFetcher::new(tree_site(2)).failing(&broken, 10));
    let (backend, ctx) = memory_context(fetcher.clone());
    CrawlStarter::new(ctx.clone())
        .start(&root(), options("retry"))
        .await
        .expect("start failed");

    let events = run_workers(ctx.clone(), 1, "retry").await;

    let retried: Vec<u32> = events
        .iter()
        .filter_map(|event| match event {
            WorkerEvent::Retried { url, attempt, .. } if *url == broken => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(retried, vec![1, 2]);
    let abandoned = events
        .iter()
        .filter(|event| matches!(event, WorkerEvent::Abandoned { url, .. } if *url == broken))
        .count();
    assert_eq!(abandoned, 1);

    let state = ctx.crawl_state("retry");
    assert!(state.is_finished().await.unwrap());
    assert_eq!(state.finished_enqueued_count().await.unwrap(), 1);
    assert_eq!(
        state.queue_count().await.unwrap(),
        state.crawl_count().await.unwrap()
    );

    let maintenance = CrawlMaintenance::new(backend.clone(), "spindle_crawl_job");
    let failed = maintenance.failed_jobs_for_crawl("retry").await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].payload["url"], serde_json::json!(broken));
    assert_eq!(maintenance.stats().await.unwrap().failed, 1);
}

#[tokio::test]
async fn test_requeued_job_recovers_after_abandonment() {
    let flaky = format!("{}/s0", SITE);
    let fetcher = Arc::new(StubFetcher::new(tree_site(2)).failing(&flaky, 3));
    let (backend, ctx) = memory_context(fetcher.clone());
    CrawlStarter::new(ctx.clone())
        .start(&root(), options("rescue"))
        .await
        .expect("start failed");

    run_workers(ctx.clone(), 1, "rescue").await;
    let state = ctx.crawl_state("rescue");
    assert!(!state.is_crawled(&flaky).await.unwrap());
    let crawled_before = state.crawl_count().await.unwrap();

    let maintenance = CrawlMaintenance::new(backend.clone(), "spindle_crawl_job");
    assert_eq!(maintenance.requeue_failed_jobs("rescue").await.unwrap(), 1);
    assert_eq!(maintenance.stats().await.unwrap().failed, 0);

    let events = run_workers(ctx.clone(), 1, "rescue").await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        WorkerEvent::Completed(report) if report.outcome == JobOutcome::Skipped
    ));
    assert!(state.is_crawled(&flaky).await.unwrap());
    assert_eq!(state.crawl_count().await.unwrap(), crawled_before + 1);
    assert_eq!(
        state.queue_count().await.unwrap(),
        state.crawl_count().await.unwrap()
    );
    assert_eq!(state.finished_enqueued_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_depth_keeps_smallest_seen() {
    let (_, ctx) = memory_context(Arc::new(StubFetcher::new(Default::default())));
    let state: CrawlState = ctx.crawl_state("depth");
    let url = format!("{}/x", SITE);

    state.record_depth(&url, 5).await.unwrap();
    state.record_depth(&url, 2).await.unwrap();
    state.record_depth(&url, 4).await.unwrap();

    assert_eq!(state.depth_of(&url).await.unwrap(), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crawl_over_sqlite_backend() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let backend = Arc::new(
        SqliteBackend::new(&dir.path().join("spindle.db")).expect("Failed to open database"),
    );
    let fetcher = Arc::new(StubFetcher::new(tree_site(3)));
    let ctx = stub_context(backend.clone(), fetcher);

    CrawlStarter::new(ctx.clone())
        .start(&root(), options("sqlite"))
        .await
        .expect("start failed");
    run_workers(ctx.clone(), 3, "sqlite").await;

    let state = ctx.crawl_state("sqlite");
    assert_eq!(state.crawl_count().await.unwrap(), 13);
    assert_eq!(state.finished_enqueued_count().await.unwrap(), 1);
    assert_eq!(backend.size("spindle_finished_job").await.unwrap(), 1);
    assert_eq!(backend.size("spindle_process_job").await.unwrap(), 13);

    let notification = backend
        .dequeue("spindle_finished_job")
        .await
        .unwrap()
        .expect("no notification");
    assert_eq!(notification["crawl_id"], serde_json::json!("sqlite"));
    assert_eq!(notification["crawl_counter"], serde_json::json!(13));
    assert_eq!(notification["crawled_base_url"], serde_json::json!(root()));
}
