//! Integration tests for whole crawls
//!
//! These tests use wiremock to create mock HTTP servers and drive crawls
//! end-to-end through the real reqwest fetcher, response cache and robots
//! source.

mod common;

use common::{fast_worker_config, page, run_workers};
use spindle::crawler::CrawlContext;
use spindle::state::keys;
use spindle::{CrawlOptions, CrawlStarter, GlobPattern, MemoryBackend, StateStore, WorkQueue};
use std::sync::Arc;
use std::time::Instant;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_page(server: &MockServer, route: &str, links: &[&str]) {
    let links: Vec<String> = links.iter().map(|link| link.to_string()).collect();
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(page(&links), "text/html"))
        .mount(server)
        .await;
}

async fn mount_robots(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/plain"))
        .mount(server)
        .await;
}

fn http_context() -> (Arc<MemoryBackend>, Arc<CrawlContext>) {
    let backend = Arc::new(MemoryBackend::new());
    let ctx = CrawlContext::with_backend(backend.clone(), fast_worker_config())
        .expect("Failed to build context");
    (backend, Arc::new(ctx))
}

fn options(crawl_id: &str) -> CrawlOptions {
    let mut options = CrawlOptions::default();
    options.crawl_id = Some(crawl_id.to_string());
    options
}

/// Paths requested from the server, robots.txt excluded
async fn requested_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .expect("Request recording disabled")
        .iter()
        .map(|request| request.url.path().to_string())
        .filter(|path| path != "/robots.txt")
        .collect()
}

#[tokio::test]
async fn test_limits_scenario() {
    let server = MockServer::start().await;
    let base = server.uri();

    let children: Vec<String> = (1..=12).map(|i| format!("/p{}", i)).collect();
    let children: Vec<&str> = children.iter().map(String::as_str).collect();
    mount_page(&server, "/", &children).await;
    mount_page(&server, "/p1", &["/d1", "/d2"]).await;
    for child in &children[1..] {
        mount_page(&server, child, &[]).await;
    }
    mount_page(&server, "/d1", &[]).await;
    mount_page(&server, "/d2", &[]).await;

    let (backend, ctx) = http_context();
    let mut options = options("scenario");
    options.depth_limit = Some(2);
    options.crawl_limit = Some(10);
    CrawlStarter::new(ctx.clone())
        .start(&base, options)
        .await
        .expect("Failed to start crawl");

    run_workers(ctx.clone(), 3, "scenario").await;

    let paths = requested_paths(&server).await;
    assert_eq!(paths.len(), 10, "fetched {:?}", paths);

    let state = ctx.crawl_state("scenario");
    assert_eq!(state.crawl_count().await.unwrap(), 10);
    assert_eq!(state.queue_count().await.unwrap(), 10);
    assert_eq!(state.finished_enqueued_count().await.unwrap(), 1);
    assert_eq!(backend.size("spindle_finished_job").await.unwrap(), 1);

    // p1 was fetched, so its depth-3 links were seen but never queued
    assert!(state.is_crawled(&format!("{}/p1", base)).await.unwrap());
    assert_eq!(state.depth_of(&format!("{}/p1", base)).await.unwrap(), Some(2));
    assert!(!state.is_queued(&format!("{}/d1", base)).await.unwrap());
    assert!(!state.is_queued(&format!("{}/d2", base)).await.unwrap());
    assert!(!paths.iter().any(|p| p.starts_with("/d")));
}

#[tokio::test]
async fn test_redirect_target_is_crawled() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(&server, "/", &["/old"]).await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
        .mount(&server)
        .await;
    mount_page(&server, "/new", &[]).await;

    let (backend, ctx) = http_context();
    CrawlStarter::new(ctx.clone())
        .start(&base, options("redirect"))
        .await
        .expect("Failed to start crawl");
    run_workers(ctx.clone(), 1, "redirect").await;

    let state = ctx.crawl_state("redirect");
    let new_url = format!("{}/new", base);
    assert!(state.is_queued(&new_url).await.unwrap());
    assert!(state.is_crawled(&new_url).await.unwrap());
    assert_eq!(state.crawl_count().await.unwrap(), 3);
    assert_eq!(state.finished_enqueued_count().await.unwrap(), 1);

    let mut saw_hop = false;
    while let Some(payload) = backend.dequeue("spindle_process_job").await.unwrap() {
        if payload["base_url"] == serde_json::json!(format!("{}/old", base)) {
            assert_eq!(payload["redirect_through"], serde_json::json!([new_url.clone()]));
            assert_eq!(payload["depth"], serde_json::json!(2));
            saw_hop = true;
        }
    }
    assert!(saw_hop);
}

#[tokio::test]
async fn test_rejected_mime_type_is_not_dispatched() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(&server, "/", &["/logo.png", "/about"]).await;
    mount_page(&server, "/about", &[]).await;
    Mock::given(method("GET"))
        .and(path("/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0x89u8, 0x50, 0x4e, 0x47], "image/png"))
        .mount(&server)
        .await;

    let (backend, ctx) = http_context();
    let mut options = options("mime");
    options.valid_mime_types = vec!["text/html".to_string()];
    CrawlStarter::new(ctx.clone())
        .start(&base, options)
        .await
        .expect("Failed to start crawl");
    run_workers(ctx.clone(), 1, "mime").await;

    let state = ctx.crawl_state("mime");
    assert_eq!(state.crawl_count().await.unwrap(), 3);
    assert_eq!(state.finished_enqueued_count().await.unwrap(), 1);
    assert_eq!(backend.size("spindle_process_job").await.unwrap(), 2);

    let notification = backend
        .dequeue("spindle_finished_job")
        .await
        .unwrap()
        .expect("No completion notification");
    assert_eq!(notification["mime_counts"]["image/png"], serde_json::json!(1));
    assert_eq!(notification["status_counts"]["200"], serde_json::json!(3));
}

#[tokio::test]
async fn test_obey_robots_refuses_disallowed_urls() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nDisallow: /private").await;
    mount_page(&server, "/", &["/private/x", "/public"]).await;
    mount_page(&server, "/private/x", &[]).await;
    mount_page(&server, "/public", &[]).await;

    let (_, ctx) = http_context();
    let mut options = options("robots");
    options.obey_robots = true;
    CrawlStarter::new(ctx.clone())
        .start(&base, options)
        .await
        .expect("Failed to start crawl");
    run_workers(ctx.clone(), 1, "robots").await;

    let paths = requested_paths(&server).await;
    assert!(!paths.contains(&"/private/x".to_string()));

    let state = ctx.crawl_state("robots");
    assert_eq!(state.crawl_count().await.unwrap(), 2);
    assert_eq!(state.queue_count().await.unwrap(), 2);
    assert_eq!(state.finished_enqueued_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_robots_delay_spaces_retrievals() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nCrawl-delay: 0.2").await;
    mount_page(&server, "/", &["/a", "/b"]).await;
    mount_page(&server, "/a", &[]).await;
    mount_page(&server, "/b", &[]).await;

    let (backend, ctx) = http_context();
    let mut options = options("delay");
    options.respect_robots_delay = true;

    let started = Instant::now();
    CrawlStarter::new(ctx.clone())
        .start(&base, options)
        .await
        .expect("Failed to start crawl");
    run_workers(ctx.clone(), 2, "delay").await;

    assert!(started.elapsed().as_millis() >= 350);

    let state = ctx.crawl_state("delay");
    let delay = backend
        .get(&state.key(keys::ROBOTS_PER_PAGE_DELAY))
        .await
        .unwrap();
    assert_eq!(delay.as_deref(), Some("200"));
    assert_eq!(state.crawl_count().await.unwrap(), 3);
    assert_eq!(state.finished_enqueued_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_unreachable_page_counts_as_processed() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_page(&server, "/", &["http://127.0.0.1:1/down"]).await;

    let (_, ctx) = http_context();
    let mut options = options("down");
    options.internal_urls = vec![format!("{}/*", base), "http://127.0.0.1:1/*".to_string()];
    options.timeout = 2;
    CrawlStarter::new(ctx.clone())
        .start(&base, options)
        .await
        .expect("Failed to start crawl");
    run_workers(ctx.clone(), 1, "down").await;

    let state = ctx.crawl_state("down");
    assert_eq!(state.crawl_count().await.unwrap(), 2);
    assert!(state.is_crawled("http://127.0.0.1:1/down").await.unwrap());
    assert_eq!(state.finished_enqueued_count().await.unwrap(), 1);
}

#[test]
fn test_glob_matching() {
    let pattern = GlobPattern::new("*.example.com/*").unwrap();
    assert!(pattern.is_match("http://sub.example.com/path"));
    assert!(!pattern.is_match("http://notexample.com/"));
}
