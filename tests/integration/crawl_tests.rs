//! Session-level crawl behavior

use crate::common::{create_test_config, mount_page, options, page_url, requests_to};
use sluice::crawler::SkipReason;
use sluice::{CrawlEngine, CrawlOutcome};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_full_crawl_respects_max_depth() {
    let server = MockServer::start().await;

    mount_page(
        &server,
        "/",
        r#"<html><head><title>Home</title></head><body>
        <a href="/page1">Page 1</a>
        <a href="/page2">Page 2</a>
        </body></html>"#,
        1,
    )
    .await;
    mount_page(&server, "/page1", r#"<a href="/deep">Deeper</a>"#, 1).await;
    mount_page(&server, "/page2", r#"<a href="/page1">Back</a>"#, 1).await;
    mount_page(&server, "/deep", "<p>too deep</p>", 0).await;

    let engine = CrawlEngine::new(create_test_config()).unwrap();
    let summary = engine
        .crawl(&server.uri(), options(1, 50), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.outcome, CrawlOutcome::Completed);
    assert_eq!(summary.pages_crawled, 3);
    assert_eq!(summary.errors, 0);
    assert!(summary.results.iter().all(|r| r.depth <= 1));

    let home = summary.result_for(&page_url(&server, "/")).unwrap();
    assert_eq!(home.title.as_deref(), Some("Home"));
    assert_eq!(home.links_count, 2);
    assert_eq!(home.depth, 0);

    let page1 = summary.result_for(&page_url(&server, "/page1")).unwrap();
    assert_eq!(page1.discovered_from, Some(page_url(&server, "/")));

    let deep: Vec<_> = summary.skipped_for(SkipReason::DepthLimit).collect();
    assert_eq!(deep.len(), 1);
    assert_eq!(deep[0].url, page_url(&server, "/deep"));
    assert_eq!(deep[0].depth, 2);

    // seed, page1, page2, deep
    assert_eq!(summary.pages_found, 4);
}

#[tokio::test]
async fn test_dispatch_order_is_breadth_first() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/a">a</a><a href="/b">b</a>"#, 1).await;
    mount_page(&server, "/a", r#"<a href="/a1">a1</a>"#, 1).await;
    mount_page(&server, "/b", r#"<a href="/b1">b1</a>"#, 1).await;
    mount_page(&server, "/a1", "<p>leaf</p>", 1).await;
    mount_page(&server, "/b1", "<p>leaf</p>", 1).await;

    let engine = CrawlEngine::new(create_test_config()).unwrap();
    let mut opts = options(2, 50);
    opts.concurrency = 1;
    let summary = engine
        .crawl(&server.uri(), opts, CancellationToken::new())
        .await
        .unwrap();

    let depths: Vec<u32> = summary.results.iter().map(|r| r.depth).collect();
    assert_eq!(depths, vec![0, 1, 1, 2, 2]);
}

#[tokio::test]
async fn test_external_and_excluded_links_are_skipped() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        r#"<a href="https://elsewhere.example/x">ext</a>
        <a href="/admin/panel">admin</a>
        <a href="/docs/intro">docs</a>
        <a href="mailto:someone@example.com">mail</a>"#,
        1,
    )
    .await;
    mount_page(&server, "/docs/intro", "<p>docs</p>", 1).await;
    mount_page(&server, "/admin/panel", "<p>admin</p>", 0).await;

    let engine = CrawlEngine::new(create_test_config()).unwrap();
    let mut opts = options(2, 50);
    opts.exclude_patterns = vec!["/admin/".to_string()];
    let summary = engine
        .crawl(&server.uri(), opts, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.pages_crawled, 2);
    assert_eq!(summary.skipped_for(SkipReason::ExternalDomain).count(), 1);
    assert_eq!(summary.skipped_for(SkipReason::Excluded).count(), 1);
}

#[tokio::test]
async fn test_page_limit_reached() {
    let server = MockServer::start().await;
    let links: String = (0..20)
        .map(|i| format!(r#"<a href="/p{}">p{}</a>"#, i, i))
        .collect();
    mount_page(&server, "/", &links, 1).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>leaf</p>"))
        .mount(&server)
        .await;

    let engine = CrawlEngine::new(create_test_config()).unwrap();
    let summary = engine
        .crawl(&server.uri(), options(1, 5), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.outcome, CrawlOutcome::LimitReached);
    assert_eq!(summary.pages_dispatched(), 5);
    assert_eq!(summary.skipped_for(SkipReason::PageLimit).count(), 16);

    let leaf_requests: usize = {
        let mut total = 0;
        for i in 0..20 {
            total += requests_to(&server, &format!("/p{}", i)).await;
        }
        total
    };
    assert_eq!(leaf_requests, 4);
}

#[tokio::test]
async fn test_failed_pages_are_reported_not_fatal() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/missing">gone</a><a href="/ok">ok</a>"#, 1).await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mount_page(&server, "/ok", "<p>fine</p>", 1).await;

    let engine = CrawlEngine::new(create_test_config()).unwrap();
    let summary = engine
        .crawl(&server.uri(), options(1, 50), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.outcome, CrawlOutcome::Completed);
    assert_eq!(summary.pages_crawled, 2);
    assert_eq!(summary.errors, 1);

    let missing = summary.result_for(&page_url(&server, "/missing")).unwrap();
    assert_eq!(missing.status_code, Some(404));
    assert!(missing.error.is_some());
}

#[tokio::test]
async fn test_extract_content_keeps_bodies() {
    let server = MockServer::start().await;
    mount_page(&server, "/", "<html><body><p>hello</p></body></html>", 2).await;

    let engine = CrawlEngine::new(create_test_config()).unwrap();

    let without = engine
        .crawl(&server.uri(), options(1, 10), CancellationToken::new())
        .await
        .unwrap();
    assert!(without.results[0].content.is_none());

    engine.cache().clear().unwrap();
    let mut opts = options(1, 10);
    opts.extract_content = true;
    let with = engine
        .crawl(&server.uri(), opts, CancellationToken::new())
        .await
        .unwrap();
    assert!(with.results[0].content.as_deref().unwrap().contains("hello"));
}

#[tokio::test]
async fn test_links_fetched_as_written_and_deduplicated_by_normalized_form() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        r#"<a href="/docs/">Docs</a><a href="/docs#install">Install</a><a href="/docs/?utm_source=nav">Nav</a>"#,
        1,
    )
    .await;
    mount_page(&server, "/docs/", "<title>Docs</title>", 1).await;

    let engine = CrawlEngine::new(create_test_config()).unwrap();
    let summary = engine
        .crawl(&server.uri(), options(1, 10), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.errors, 0);
    assert_eq!(summary.pages_crawled, 2);
    assert_eq!(requests_to(&server, "/docs/").await, 1);
    assert_eq!(requests_to(&server, "/docs").await, 0);

    let docs = summary
        .result_for(&format!("{}/docs/", server.uri()))
        .unwrap();
    assert_eq!(docs.status_code, Some(200));
    assert_eq!(docs.title.as_deref(), Some("Docs"));
    assert_eq!(summary.skipped_for(SkipReason::AlreadySeen).count(), 2);
}
