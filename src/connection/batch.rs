use super::{ConnectionError, ConnectionManager, HttpRequest, HttpResponse};
use futures::future::{join_all, try_join_all};
use tracing::{debug, warn};

/// Result of one request within a batch
pub type BatchResult = Result<HttpResponse, ConnectionError>;

/// How a batch of requests is executed
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Requests run concurrently per chunk
    pub max_concurrent: usize,

    /// Retry each failed request once after its chunk completes
    pub retry_failed: bool,

    /// Abort the batch on the first failure; without `retry_failed` the
    /// chunk's in-flight requests are dropped as soon as one fails
    pub fail_fast: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            retry_failed: false,
            fail_fast: false,
        }
    }
}

impl ConnectionManager {
    /// Executes many requests in concurrent chunks
    ///
    /// The requests are split into chunks of `max_concurrent`; each chunk runs
    /// concurrently and the next chunk starts when it completes. Socket caps
    /// and backpressure still apply to every request.
    ///
    /// # Returns
    ///
    /// * `Ok(results)` - One result per request, in input order
    /// * `Err(ConnectionError::BatchAborted)` - With `fail_fast`, the first
    ///   failure (after any retry)
    pub async fn execute_batch(
        &self,
        requests: Vec<HttpRequest>,
        options: BatchOptions,
    ) -> Result<Vec<BatchResult>, ConnectionError> {
        let chunk_size = options.max_concurrent.max(1);
        let mut results = Vec::with_capacity(requests.len());

        debug!(
            requests = requests.len(),
            chunk_size,
            "Executing request batch"
        );

        for (chunk_index, chunk) in requests.chunks(chunk_size).enumerate() {
            let offset = chunk_index * chunk_size;

            if options.fail_fast && !options.retry_failed {
                let responses = try_join_all(chunk.iter().cloned().enumerate().map(
                    |(position, request)| async move {
                        self.execute(request).await.map_err(|e| (position, e))
                    },
                ))
                .await
                .map_err(|(position, source)| ConnectionError::BatchAborted {
                    index: offset + position,
                    source: Box::new(source),
                })?;
                results.extend(responses.into_iter().map(Ok));
                continue;
            }

            let mut chunk_results =
                join_all(chunk.iter().cloned().map(|request| self.execute(request))).await;

            if options.retry_failed {
                let failed: Vec<usize> = chunk_results
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.is_err())
                    .map(|(i, _)| i)
                    .collect();

                if !failed.is_empty() {
                    warn!(count = failed.len(), "Retrying failed batch requests");
                    let retried =
                        join_all(failed.iter().map(|&i| self.execute(chunk[i].clone()))).await;
                    for (i, result) in failed.into_iter().zip(retried) {
                        chunk_results[i] = result;
                    }
                }
            }

            for (position, result) in chunk_results.into_iter().enumerate() {
                match result {
                    Err(source) if options.fail_fast => {
                        return Err(ConnectionError::BatchAborted {
                            index: offset + position,
                            source: Box::new(source),
                        });
                    }
                    result => results.push(result),
                }
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use std::time::Duration;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_manager(max_sockets: usize) -> ConnectionManager {
        let config = ConnectionConfig {
            max_sockets,
            max_free_sockets: max_sockets.min(10),
            backpressure_check_interval_ms: 5,
            backpressure_base_delay_ms: 5,
            backpressure_max_delay_ms: 50,
            ..ConnectionConfig::default()
        };
        ConnectionManager::new(&config, "TestCrawler/1.0").unwrap()
    }

    fn requests(server: &MockServer, route: &str, n: usize) -> Vec<HttpRequest> {
        (0..n)
            .map(|_| HttpRequest::get(Url::parse(&format!("{}{}", server.uri(), route)).unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_reports_per_item() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let manager = create_test_manager(4);
        let mut batch = requests(&server, "/ok", 3);
        batch.insert(1, HttpRequest::get(Url::parse("ftp://example.com/").unwrap()));

        let results = manager
            .execute_batch(batch, BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        assert!(results[3].is_ok());
    }

    #[tokio::test]
    async fn test_fail_fast_aborts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let manager = create_test_manager(4);
        let mut batch = requests(&server, "/", 2);
        batch.push(HttpRequest::get(Url::parse("ftp://example.com/").unwrap()));
        batch.extend(requests(&server, "/", 4));

        let err = manager
            .execute_batch(
                batch,
                BatchOptions {
                    max_concurrent: 3,
                    retry_failed: false,
                    fail_fast: true,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectionError::BatchAborted { index: 2, .. }));
        // The second chunk never ran
        assert_eq!(manager.stats().total_requests, 2);
    }

    #[tokio::test]
    async fn test_fail_fast_drops_in_flight_siblings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let manager = create_test_manager(4);
        let mut batch = requests(&server, "/slow", 2);
        batch.push(HttpRequest::get(Url::parse("ftp://example.com/").unwrap()));

        let started = std::time::Instant::now();
        let err = manager
            .execute_batch(
                batch,
                BatchOptions {
                    max_concurrent: 3,
                    retry_failed: false,
                    fail_fast: true,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectionError::BatchAborted { index: 2, .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(manager.active_requests(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_capped_by_max_sockets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(50)))
            .mount(&server)
            .await;

        let manager = create_test_manager(10);
        let results = manager
            .execute_batch(
                requests(&server, "/slow", 50),
                BatchOptions {
                    max_concurrent: 50,
                    ..BatchOptions::default()
                },
            )
            .await
            .unwrap();

        assert!(results.iter().all(|r| r.is_ok()));
        let stats = manager.stats();
        assert_eq!(stats.total_requests, 50);
        assert_eq!(stats.failed_requests, 0);
        assert!(stats.peak_active_requests <= 10);
        // Requests queued behind the cap count toward utilization
        assert!(stats.backpressure_events > 0);
        assert!(stats.total_backpressure_delay_ms > 0);
    }
}
