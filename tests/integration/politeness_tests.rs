//! robots.txt, per-origin rate limits and connection caps

use crate::common::{create_test_config, html_response, mount_page, options, page_url};
use futures::future::join_all;
use sluice::config::ConnectionConfig;
use sluice::connection::{BatchOptions, HttpRequest};
use sluice::crawler::SkipReason;
use sluice::{ConnectionManager, CrawlEngine};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_robots_txt_disallow_is_respected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_page(
        &server,
        "/",
        r#"<a href="/private/secret">secret</a><a href="/public">public</a>"#,
        1,
    )
    .await;
    mount_page(&server, "/public", "<p>hello</p>", 1).await;
    mount_page(&server, "/private/secret", "<p>nope</p>", 0).await;

    let engine = CrawlEngine::new(create_test_config()).unwrap();
    let summary = engine
        .crawl(&server.uri(), options(2, 10), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.pages_crawled, 2);
    let disallowed: Vec<_> = summary.skipped_for(SkipReason::RobotsDisallowed).collect();
    assert_eq!(disallowed.len(), 1);
    assert_eq!(disallowed[0].url, page_url(&server, "/private/secret"));
}

#[tokio::test]
async fn test_robots_txt_ignored_when_disabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"))
        .expect(0)
        .mount(&server)
        .await;
    mount_page(&server, "/", "<p>home</p>", 1).await;

    let engine = CrawlEngine::new(create_test_config()).unwrap();
    let mut opts = options(1, 10);
    opts.respect_robots = false;
    let summary = engine
        .crawl(&server.uri(), opts, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.pages_crawled, 1);
}

#[tokio::test]
async fn test_rate_limit_spreads_requests_over_windows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html_response("<p>item</p>"))
        .mount(&server)
        .await;

    let mut config = create_test_config();
    config.rate_limit.requests_per_window = 5;
    config.rate_limit.window_ms = 200;
    let engine = CrawlEngine::new(config).unwrap();

    let urls: Vec<String> = (0..20).map(|i| page_url(&server, &format!("/item{}", i))).collect();
    let started = Instant::now();
    let results = join_all(urls.iter().map(|u| engine.fetcher().fetch(u))).await;
    let elapsed = started.elapsed();

    assert!(results.iter().all(|r| r.is_ok()));
    // 20 requests at 5 per window need the first burst plus three more windows
    assert!(
        elapsed >= Duration::from_millis(600),
        "finished too fast: {:?}",
        elapsed
    );

    let stats = engine.rate_limiter().stats();
    assert_eq!(stats.total_requests, 20);
    assert!(stats.total_wait > Duration::ZERO);
}

#[tokio::test]
async fn test_batch_never_exceeds_socket_cap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(50)))
        .mount(&server)
        .await;

    let config = ConnectionConfig {
        max_sockets: 10,
        max_free_sockets: 10,
        backpressure_max_delay_ms: 100,
        ..ConnectionConfig::default()
    };
    let manager = ConnectionManager::new(&config, "TestBot/1.0").unwrap();

    let requests: Vec<HttpRequest> = (0..50)
        .map(|i| HttpRequest::get(Url::parse(&format!("{}/b{}", server.uri(), i)).unwrap()))
        .collect();
    let results = manager
        .execute_batch(
            requests,
            BatchOptions {
                max_concurrent: 50,
                ..BatchOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 50);
    assert!(results.iter().all(|r| r.as_ref().map(|resp| resp.is_success()).unwrap_or(false)));

    let stats = manager.stats();
    assert_eq!(stats.total_requests, 50);
    assert!(stats.peak_active_requests <= 10);
    assert!(stats.peak_active_requests > 1);
    assert!(stats.backpressure_events > 0);
}
