//! Guarded fetching of a single URL
//!
//! This module handles one request end to end:
//! - Security validation of the URL and of every redirect target
//! - Cache lookup before any network work, cache write after success
//! - Per-origin rate limiting for every attempt
//! - Retry with exponential backoff for timeouts, network errors and 5xx
//! - Manual redirect handling bounded by `max-redirects`

use crate::cache::{CacheKey, CacheLayer, SetOptions};
use crate::config::RetryConfig;
use crate::connection::{ConnectionError, ConnectionManager, HttpRequest, HttpResponse};
use crate::crawler::RateLimiter;
use crate::security::{SecurityGate, ValidationContext, ValidationResult};
use crate::url::origin_key;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Why a fetch produced no page
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The security gate rejected the URL or a redirect target
    #[error("Blocked by security gate: {url} ({})", .result.summary())]
    Validation {
        url: String,
        result: Box<ValidationResult>,
    },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Too many redirects from {url} (limit {limit})")]
    TooManyRedirects { url: String, limit: u32 },

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },
}

impl FetchError {
    /// The HTTP status, when a response was received
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    fn from_connection(url: &Url, error: ConnectionError) -> Self {
        match error {
            ConnectionError::Timeout { url } => Self::Timeout { url },
            ConnectionError::Network { url, message } => Self::Network { url, message },
            other => Self::Network {
                url: url.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// A successfully fetched page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    /// The URL as requested (sanitized by the gate)
    pub requested_url: String,

    /// The URL that served the body, after redirects
    pub final_url: String,

    pub status: u16,

    pub content_type: Option<String>,

    pub body: String,

    /// Redirect hops followed
    pub redirects: u32,

    #[serde(skip)]
    pub from_cache: bool,
}

/// Runs the fetch pipeline for one URL
///
/// Gate, then cache, then rate limiter, then connection manager. Only the
/// gate can fail a URL before any network work; the limiter and the
/// connection manager only delay.
pub struct FetchExecutor {
    gate: Arc<SecurityGate>,
    cache: Arc<CacheLayer>,
    rate_limiter: Arc<RateLimiter>,
    connections: Arc<ConnectionManager>,
    retry: RetryConfig,
}

impl FetchExecutor {
    pub fn new(
        gate: Arc<SecurityGate>,
        cache: Arc<CacheLayer>,
        rate_limiter: Arc<RateLimiter>,
        connections: Arc<ConnectionManager>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            gate,
            cache,
            rate_limiter,
            connections,
            retry,
        }
    }

    /// Fetches one URL
    ///
    /// # Arguments
    ///
    /// * `url` - The URL as discovered
    ///
    /// # Returns
    ///
    /// * `Ok(FetchedPage)` - A 2xx response, possibly served from cache
    /// * `Err(FetchError)` - The page error to record
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let verdict = self.gate.validate(url, ValidationContext::initial()).await;
        let target = match (verdict.allowed, verdict.sanitized_url.as_deref()) {
            (true, Some(sanitized)) => sanitized.to_string(),
            _ => {
                return Err(FetchError::Validation {
                    url: url.to_string(),
                    result: Box::new(verdict),
                })
            }
        };

        let key = CacheKey::for_url(&target);
        match self.cache.get::<FetchedPage>(&key) {
            Ok(Some(mut page)) => {
                debug!(url = %target, "Served from cache");
                page.from_cache = true;
                return Ok(page);
            }
            Ok(None) => {}
            Err(e) => warn!(url = %target, error = %e, "Cache read failed"),
        }

        let page = self.fetch_following_redirects(&target).await?;

        let mut options = SetOptions::default();
        if let Ok(parsed) = Url::parse(&page.final_url) {
            if let Some(host) = parsed.host_str() {
                options = options.tag(format!("host:{}", host));
            }
        }
        if let Err(e) = self.cache.set(&key, &page, options) {
            warn!(url = %target, error = %e, "Cache write failed");
        }

        Ok(page)
    }

    async fn fetch_following_redirects(&self, target: &str) -> Result<FetchedPage, FetchError> {
        let limit = self.gate.max_redirects();
        let mut current = Url::parse(target).map_err(|e| FetchError::Network {
            url: target.to_string(),
            message: e.to_string(),
        })?;
        let mut hop = 0u32;

        loop {
            let response = self.request_with_retry(&current).await?;

            if response.is_redirect() {
                let Some(next) = response.location() else {
                    return Err(FetchError::HttpStatus {
                        url: current.to_string(),
                        status: response.status,
                    });
                };
                if hop >= limit {
                    warn!(url = target, limit, "Redirect limit reached");
                    return Err(FetchError::TooManyRedirects {
                        url: target.to_string(),
                        limit,
                    });
                }
                hop += 1;

                let verdict = self
                    .gate
                    .validate(next.as_str(), ValidationContext::redirect(hop))
                    .await;
                current = match verdict.sanitized_url.as_deref().map(Url::parse) {
                    Some(Ok(sanitized)) if verdict.allowed => sanitized,
                    _ => {
                        return Err(FetchError::Validation {
                            url: next.to_string(),
                            result: Box::new(verdict),
                        })
                    }
                };
                debug!(from = target, to = %current, hop, "Following redirect");
                continue;
            }

            if !response.is_success() {
                return Err(FetchError::HttpStatus {
                    url: current.to_string(),
                    status: response.status,
                });
            }

            return Ok(FetchedPage {
                requested_url: target.to_string(),
                final_url: current.to_string(),
                status: response.status,
                content_type: response.header("content-type").map(str::to_string),
                body: response.body,
                redirects: hop,
                from_cache: false,
            });
        }
    }

    /// One request, retried on transient failures and 5xx
    ///
    /// Every attempt passes the rate limiter, so retries stay polite.
    async fn request_with_retry(&self, url: &Url) -> Result<HttpResponse, FetchError> {
        let origin = origin_key(url);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.rate_limiter.acquire(&origin).await;
            let result = self.connections.execute(HttpRequest::get(url.clone())).await;

            let retryable = match &result {
                Ok(response) => response.status >= 500,
                Err(e) => e.is_transient(),
            };
            if !retryable || attempt >= max_attempts {
                return result.map_err(|e| FetchError::from_connection(url, e));
            }

            let retry_reason = match &result {
                Ok(response) => format!("HTTP {}", response.status),
                Err(e) => e.to_string(),
            };
            let backoff = self.retry.backoff(attempt);
            warn!(
                url = %url,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "Retrying after {}",
                retry_reason
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, ConnectionConfig, RateLimitConfig, SecurityConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_executor(max_redirects: u32) -> (FetchExecutor, Arc<ConnectionManager>) {
        let security = SecurityConfig {
            allowed_hosts: vec!["127.0.0.1".to_string()],
            max_redirects,
            ..SecurityConfig::default()
        };
        let connections =
            Arc::new(ConnectionManager::new(&ConnectionConfig::default(), "TestCrawler/1.0").unwrap());
        let executor = FetchExecutor::new(
            Arc::new(SecurityGate::new(&security)),
            Arc::new(CacheLayer::new(&CacheConfig::default()).unwrap()),
            Arc::new(RateLimiter::new(&RateLimitConfig {
                requests_per_window: 100,
                window_ms: 1000,
            })),
            Arc::clone(&connections),
            RetryConfig {
                max_attempts: 3,
                base_delay_ms: 5,
                max_delay_ms: 20,
            },
        );
        (executor, connections)
    }

    #[tokio::test]
    async fn test_second_fetch_is_served_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html></html>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (executor, _) = create_test_executor(5);
        let url = format!("{}/page", server.uri());

        let first = executor.fetch(&url).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.content_type.as_deref(), Some("text/html"));

        let second = executor.fetch(&url).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.body, "<html></html>");
    }

    #[tokio::test]
    async fn test_gate_rejection_makes_no_request() {
        let (executor, connections) = create_test_executor(5);
        let err = executor.fetch("http://localhost:8080/").await.unwrap_err();

        assert!(err.is_validation());
        assert_eq!(connections.stats().total_requests, 0);
    }

    #[tokio::test]
    async fn test_redirect_targets_are_revalidated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jump"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", "http://169.254.169.254/latest/meta-data"),
            )
            .mount(&server)
            .await;

        let (executor, connections) = create_test_executor(5);
        let err = executor
            .fetch(&format!("{}/jump", server.uri()))
            .await
            .unwrap_err();

        match err {
            FetchError::Validation { url, .. } => assert!(url.contains("169.254.169.254")),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(connections.stats().total_requests, 1);
    }

    #[tokio::test]
    async fn test_redirect_chain_stops_at_limit() {
        let server = MockServer::start().await;
        for i in 0..5 {
            Mock::given(method("GET"))
                .and(path(format!("/r{}", i)))
                .respond_with(
                    ResponseTemplate::new(301).insert_header("Location", format!("/r{}", i + 1).as_str()),
                )
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/r3"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (executor, connections) = create_test_executor(2);
        let err = executor
            .fetch(&format!("{}/r0", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::TooManyRedirects { limit: 2, .. }));
        // r0, r1, r2 only
        assert_eq!(connections.stats().total_requests, 3);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .mount(&server)
            .await;

        let (executor, connections) = create_test_executor(5);
        let page = executor.fetch(&server.uri()).await.unwrap();

        assert_eq!(page.body, "recovered");
        assert_eq!(connections.stats().total_requests, 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let (executor, _) = create_test_executor(5);
        let err = executor.fetch(&server.uri()).await.unwrap_err();
        assert_eq!(err.status_code(), Some(404));
    }
}
