//! Bounded outbound connection management
//!
//! One [`ConnectionManager`] is shared by the whole engine. It keeps one HTTP
//! agent per protocol, caps in-flight requests per agent with a semaphore,
//! and converts overload into admission latency through [`Backpressure`].
//! Redirects are never followed here; callers re-validate each hop.

mod backpressure;
mod batch;
mod pool;

pub use backpressure::Backpressure;
pub use batch::{BatchOptions, BatchResult};
pub use pool::{ConnectionPoolState, PoolSnapshot, Protocol};

use crate::config::ConnectionConfig;
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{redirect::Policy, Client, Method};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::{debug, trace};
use url::Url;

/// Errors raised while executing an outbound request
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("Connection manager is shut down")]
    Closed,

    #[error("Batch aborted at request {index}: {source}")]
    BatchAborted {
        index: usize,
        #[source]
        source: Box<ConnectionError>,
    },
}

impl ConnectionError {
    /// Returns true for failures worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Network { .. })
    }

    fn from_reqwest(url: &Url, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

/// One outbound request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// Overrides the agent's per-request timeout
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A fully read response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub url: Url,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
    pub elapsed: Duration,
    /// True if the pool estimate says an idle socket served this request
    pub reused_socket: bool,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The redirect target resolved against this response's URL
    pub fn location(&self) -> Option<Url> {
        let raw = self.headers.get(LOCATION)?.to_str().ok()?;
        self.url.join(raw).ok()
    }
}

/// Connection manager counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStats {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub active_requests: usize,
    pub peak_active_requests: usize,
    pub reused_sockets: u64,
    pub backpressure_events: u64,
    pub total_backpressure_delay_ms: u64,
    pub average_response_time_ms: f64,
    pub http_pool: PoolSnapshot,
    pub https_pool: PoolSnapshot,
}

struct Agent {
    client: Client,
    permits: Arc<Semaphore>,
}

#[derive(Default)]
struct Counters {
    /// Requests inside `execute` per protocol, queued or in flight
    demand: [AtomicUsize; 2],
    total: AtomicU64,
    failed: AtomicU64,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    reused: AtomicU64,
    backpressure_events: AtomicU64,
    backpressure_delay_ms: AtomicU64,
    response_time_ms: AtomicU64,
}

/// Process-wide pool of outbound HTTP agents
pub struct ConnectionManager {
    http: Agent,
    https: Agent,
    pool: ConnectionPoolState,
    backpressure: Backpressure,
    counters: Counters,
    request_timeout: Duration,
}

/// Counts a request toward its agent's demand until dropped
struct Demand<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> Demand<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }

    fn current(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Drop for Demand<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Releases the in-flight slot even if the request future is dropped
struct InFlight<'a> {
    manager: &'a ConnectionManager,
    protocol: Protocol,
    host: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.manager.counters.active.fetch_sub(1, Ordering::SeqCst);
        self.manager.pool.finish(self.protocol, &self.host);
    }
}

impl ConnectionManager {
    /// Builds both protocol agents
    ///
    /// # Arguments
    ///
    /// * `config` - Pool sizes, timeouts, and backpressure tuning
    /// * `user_agent` - Value of the `User-Agent` header on every request
    pub fn new(config: &ConnectionConfig, user_agent: &str) -> Result<Self, ConnectionError> {
        Ok(Self {
            http: Self::build_agent(config, user_agent, false)?,
            https: Self::build_agent(config, user_agent, true)?,
            pool: ConnectionPoolState::new(config.max_free_sockets, config.keep_alive()),
            backpressure: Backpressure::new(config),
            counters: Counters::default(),
            request_timeout: config.request_timeout(),
        })
    }

    fn build_agent(
        config: &ConnectionConfig,
        user_agent: &str,
        https_only: bool,
    ) -> Result<Agent, ConnectionError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.max_free_sockets)
            .pool_idle_timeout(config.keep_alive())
            .tcp_keepalive(config.keep_alive())
            .redirect(Policy::none()) // Each hop goes back through the security gate
            .https_only(https_only)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(ConnectionError::ClientBuild)?;

        Ok(Agent {
            client,
            permits: Arc::new(Semaphore::new(config.max_sockets.max(1))),
        })
    }

    /// Per-request timeout applied when a request does not set its own
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Executes one request and reads the whole body
    ///
    /// Admission first passes backpressure (a delay, never a failure), then
    /// waits for a socket permit on the protocol's agent. A request that had
    /// to queue for its permit passes backpressure again before it is sent.
    /// The body is read while the permit is held.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ConnectionError> {
        let protocol = Protocol::from_scheme(request.url.scheme())
            .ok_or_else(|| ConnectionError::UnsupportedProtocol(request.url.scheme().to_string()))?;
        let agent = match protocol {
            Protocol::Http => &self.http,
            Protocol::Https => &self.https,
        };
        let demand = Demand::enter(&self.counters.demand[protocol.index()]);

        self.admit(&request.url, demand.current()).await;

        let _permit = match agent.permits.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(ConnectionError::Closed),
            Err(TryAcquireError::NoPermits) => {
                let permit = agent
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| ConnectionError::Closed)?;
                self.admit(&request.url, demand.current()).await;
                permit
            }
        };

        let host = request.url.host_str().unwrap_or_default().to_string();
        let now_active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .peak_active
            .fetch_max(now_active, Ordering::SeqCst);
        let reused_socket = self.pool.start(protocol, &host);
        let _in_flight = InFlight {
            manager: self,
            protocol,
            host,
        };

        self.counters.total.fetch_add(1, Ordering::Relaxed);
        if reused_socket {
            self.counters.reused.fetch_add(1, Ordering::Relaxed);
        }

        let started = Instant::now();
        let result = self.send(agent, &request).await;
        let elapsed = started.elapsed();
        self.counters
            .response_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);

        match result {
            Ok((status, headers, body)) => {
                debug!(url = %request.url, status, elapsed_ms = elapsed.as_millis() as u64, "Request complete");
                Ok(HttpResponse {
                    url: request.url,
                    status,
                    headers,
                    body,
                    elapsed,
                    reused_socket,
                })
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                debug!(url = %request.url, error = %e, "Request failed");
                Err(e)
            }
        }
    }

    /// Sleeps for the backpressure delay, if any
    async fn admit(&self, url: &Url, demand: usize) {
        let Some(delay) = self.backpressure.admission_delay(demand) else {
            return;
        };
        self.counters
            .backpressure_events
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .backpressure_delay_ms
            .fetch_add(delay.as_millis() as u64, Ordering::Relaxed);
        trace!(url = %url, delay_ms = delay.as_millis() as u64, "Backpressure delay");
        tokio::time::sleep(delay).await;
    }

    async fn send(
        &self,
        agent: &Agent,
        request: &HttpRequest,
    ) -> Result<(u16, HeaderMap, String), ConnectionError> {
        let response = agent
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .timeout(request.timeout.unwrap_or(self.request_timeout))
            .send()
            .await
            .map_err(|e| ConnectionError::from_reqwest(&request.url, e))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| ConnectionError::from_reqwest(&request.url, e))?;

        Ok((status, headers, body))
    }

    /// Returns true while new admissions are being delayed
    pub fn backpressure_active(&self) -> bool {
        self.backpressure.is_active()
    }

    /// Requests currently holding a socket permit
    pub fn active_requests(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ConnectionStats {
        let total = self.counters.total.load(Ordering::Relaxed);
        let response_ms = self.counters.response_time_ms.load(Ordering::Relaxed);

        ConnectionStats {
            total_requests: total,
            failed_requests: self.counters.failed.load(Ordering::Relaxed),
            active_requests: self.counters.active.load(Ordering::SeqCst),
            peak_active_requests: self.counters.peak_active.load(Ordering::SeqCst),
            reused_sockets: self.counters.reused.load(Ordering::Relaxed),
            backpressure_events: self.counters.backpressure_events.load(Ordering::Relaxed),
            total_backpressure_delay_ms: self
                .counters
                .backpressure_delay_ms
                .load(Ordering::Relaxed),
            average_response_time_ms: if total == 0 {
                0.0
            } else {
                response_ms as f64 / total as f64
            },
            http_pool: self.pool.snapshot(Protocol::Http),
            https_pool: self.pool.snapshot(Protocol::Https),
        }
    }
}
