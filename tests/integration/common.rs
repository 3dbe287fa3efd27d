//! Shared fixtures

use sluice::config::{Config, CrawlOptions};
use sluice::normalize_url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Config that lets the engine talk to wiremock on 127.0.0.1
pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.user_agent.crawler_name = "TestBot".to_string();
    config.security.allowed_hosts = vec!["127.0.0.1".to_string()];
    config.rate_limit.requests_per_window = 1000;
    config.retry.max_attempts = 1;
    config
}

pub fn options(max_depth: u32, max_pages: u32) -> CrawlOptions {
    CrawlOptions {
        max_depth,
        max_pages,
        concurrency: 5,
        extract_content: false,
        ..CrawlOptions::default()
    }
}

/// Normalized form of a URL on the mock server
pub fn page_url(server: &MockServer, route: &str) -> String {
    normalize_url(&format!("{}{}", server.uri(), route))
        .unwrap()
        .to_string()
}

pub fn html_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html")
        .set_body_string(body.to_string())
}

/// Mounts an HTML page that must be requested exactly `hits` times
pub async fn mount_page(server: &MockServer, route: &str, body: &str, hits: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(html_response(body))
        .expect(hits)
        .mount(server)
        .await;
}

pub async fn requests_to(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == route)
        .count()
}
