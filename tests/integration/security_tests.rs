//! SSRF protection through the full fetch path

use crate::common::{create_test_config, mount_page, options, page_url, requests_to};
use sluice::security::StaticResolver;
use sluice::{CrawlEngine, CrawlOutcome};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_seed_resolving_to_metadata_address_is_never_requested() {
    let resolver = Arc::new(
        StaticResolver::new().with_host(
            "rebind.test",
            vec![IpAddr::V4(Ipv4Addr::new(169, 254, 169, 254))],
        ),
    );
    let engine = CrawlEngine::builder(create_test_config())
        .resolver(resolver.clone())
        .build()
        .unwrap();

    let summary = engine
        .crawl("http://rebind.test/latest/meta-data", options(1, 10), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.outcome, CrawlOutcome::Completed);
    assert_eq!(summary.pages_crawled, 0);
    assert_eq!(summary.errors, 1);
    let error = summary.results[0].error.as_deref().unwrap();
    assert!(error.contains("BLOCKED_IP"), "unexpected error: {}", error);
    assert!(resolver.lookups() >= 1);
    assert_eq!(engine.connections().stats().total_requests, 0);
}

#[tokio::test]
async fn test_links_to_blocked_hosts_become_page_errors() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        r#"<a href="http://wiki.corp.example/start">wiki</a>"#,
        1,
    )
    .await;

    let mut config = create_test_config();
    config.security.blocked_hostnames = vec!["*.corp.example".to_string()];
    let engine = CrawlEngine::new(config).unwrap();

    let mut opts = options(1, 10);
    opts.follow_external = true;
    let summary = engine
        .crawl(&server.uri(), opts, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.pages_crawled, 1);
    assert_eq!(summary.errors, 1);
    let wiki = summary.result_for("http://wiki.corp.example/start").unwrap();
    assert!(wiki.error.as_deref().unwrap().contains("BLOCKED_HOSTNAME"));
}

#[tokio::test]
async fn test_redirect_into_metadata_range_is_blocked() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/go"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "http://169.254.169.254/latest/meta-data/"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = CrawlEngine::new(create_test_config()).unwrap();
    let mut opts = options(1, 10);
    opts.respect_robots = false;
    let summary = engine
        .crawl(&page_url(&server, "/go"), opts, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.errors, 1);
    let error = summary.results[0].error.as_deref().unwrap();
    assert!(error.contains("169.254.169.254"), "unexpected error: {}", error);
    assert_eq!(engine.connections().stats().total_requests, 1);
}

#[tokio::test]
async fn test_redirect_chain_stops_at_limit() {
    let server = MockServer::start().await;
    for hop in 0..5 {
        Mock::given(method("GET"))
            .and(path(format!("/r{}", hop)))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", format!("/r{}", hop + 1).as_str()),
            )
            .mount(&server)
            .await;
    }

    let mut config = create_test_config();
    config.security.max_redirects = 2;
    let engine = CrawlEngine::new(config).unwrap();
    let mut opts = options(1, 10);
    opts.respect_robots = false;
    let summary = engine
        .crawl(&page_url(&server, "/r0"), opts, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.errors, 1);
    assert!(summary.results[0]
        .error
        .as_deref()
        .unwrap()
        .contains("Too many redirects"));

    // the original request plus two followed hops
    assert_eq!(requests_to(&server, "/r0").await, 1);
    assert_eq!(requests_to(&server, "/r1").await, 1);
    assert_eq!(requests_to(&server, "/r2").await, 1);
    assert_eq!(requests_to(&server, "/r3").await, 0);
}
