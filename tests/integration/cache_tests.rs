//! Cache reuse across sessions and engines

use crate::common::{create_test_config, mount_page, options, page_url};
use sluice::CrawlEngine;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

#[tokio::test]
async fn test_second_session_is_served_from_memory() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/about">About</a>"#, 1).await;
    mount_page(&server, "/about", "<title>About</title>", 1).await;

    let engine = CrawlEngine::new(create_test_config()).unwrap();

    let first = engine
        .crawl(&server.uri(), options(1, 10), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.pages_crawled, 2);
    assert!(first.results.iter().all(|r| !r.from_cache));

    let second = engine
        .crawl(&server.uri(), options(1, 10), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.pages_crawled, 2);
    assert!(second.results.iter().all(|r| r.from_cache));
    assert_eq!(
        second
            .result_for(&page_url(&server, "/about"))
            .unwrap()
            .title
            .as_deref(),
        Some("About")
    );

    let stats = engine.cache().stats();
    assert_eq!(stats.memory_hits, 2);
    assert_eq!(stats.sets, 2);
}

#[tokio::test]
async fn test_persistent_tier_survives_engine_restart() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("cache.db");

    let server = MockServer::start().await;
    mount_page(&server, "/", "<title>Home</title>", 1).await;

    let mut config = create_test_config();
    config.cache.database_path = Some(db_path.to_string_lossy().into_owned());

    {
        let engine = CrawlEngine::new(config.clone()).unwrap();
        let summary = engine
            .crawl(&server.uri(), options(1, 10), CancellationToken::new())
            .await
            .unwrap();
        assert!(!summary.results[0].from_cache);
    }

    let engine = CrawlEngine::new(config).unwrap();
    let summary = engine
        .crawl(&server.uri(), options(1, 10), CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.results[0].from_cache);
    assert_eq!(summary.results[0].title.as_deref(), Some("Home"));
    assert_eq!(engine.cache().stats().persistent_hits, 1);
}

#[tokio::test]
async fn test_host_tag_invalidation_forces_refetch() {
    let server = MockServer::start().await;
    mount_page(&server, "/", "<title>Home</title>", 2).await;

    let engine = CrawlEngine::new(create_test_config()).unwrap();
    engine
        .crawl(&server.uri(), options(1, 10), CancellationToken::new())
        .await
        .unwrap();

    let removed = engine.cache().invalidate_tag("host:127.0.0.1").unwrap();
    assert_eq!(removed, 1);

    let summary = engine
        .crawl(&server.uri(), options(1, 10), CancellationToken::new())
        .await
        .unwrap();
    assert!(!summary.results[0].from_cache);
}

#[tokio::test]
async fn test_host_tag_invalidation_after_engine_restart() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_page(&server, "/", "<title>Home</title>", 2).await;

    let mut config = create_test_config();
    config.cache.database_path = Some(dir.path().join("cache.db").to_string_lossy().into_owned());

    {
        let engine = CrawlEngine::new(config.clone()).unwrap();
        engine
            .crawl(&server.uri(), options(1, 10), CancellationToken::new())
            .await
            .unwrap();
    }

    let engine = CrawlEngine::new(config).unwrap();
    let removed = engine.cache().invalidate_tag("host:127.0.0.1").unwrap();
    assert_eq!(removed, 1);

    let summary = engine
        .crawl(&server.uri(), options(1, 10), CancellationToken::new())
        .await
        .unwrap();
    assert!(!summary.results[0].from_cache);
    assert_eq!(engine.cache().stats().persistent_hits, 0);
}
