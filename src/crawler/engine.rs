//! Crawl sessions
//!
//! A [`CrawlEngine`] owns every piece of shared host state (security gate,
//! cache, rate limiter, connection manager, robots cache). Each call to
//! [`CrawlEngine::crawl`] runs one breadth-first session over that state with
//! its own frontier, visited set and bounded worker pool.

use crate::cache::CacheLayer;
use crate::config::{validate, Config, CrawlOptions};
use crate::connection::ConnectionManager;
use crate::crawler::fetcher::FetchExecutor;
use crate::crawler::frontier::{Frontier, FrontierEntry, SkipReason, VisitedSet};
use crate::crawler::parser::{HtmlLinkExtractor, LinkExtractor, ParsedPage};
use crate::crawler::RateLimiter;
use crate::output::{CrawlOutcome, CrawlSummary, PageResult, SkippedUrl};
use crate::robots::{RobotsCache, RobotsPolicy};
use crate::security::{Resolver, SecurityGate};
use crate::state::SessionState;
use crate::storage::PersistentStore;
use crate::url::{normalize_parsed, normalize_url, LinkScope};
use crate::{SluiceError, UrlError};
use chrono::Utc;
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Shared crawl engine
///
/// Construct once and share; sessions may run concurrently and all of them
/// observe the same per-origin limits, socket caps and cache.
pub struct CrawlEngine {
    config: Config,
    gate: Arc<SecurityGate>,
    cache: Arc<CacheLayer>,
    rate_limiter: Arc<RateLimiter>,
    connections: Arc<ConnectionManager>,
    fetcher: Arc<FetchExecutor>,
    robots: Arc<dyn RobotsPolicy>,
    extractor: Arc<dyn LinkExtractor>,
}

/// Builder for [`CrawlEngine`] with replaceable collaborators
pub struct CrawlEngineBuilder {
    config: Config,
    resolver: Option<Arc<dyn Resolver>>,
    robots: Option<Arc<dyn RobotsPolicy>>,
    extractor: Option<Arc<dyn LinkExtractor>>,
    store: Option<Arc<dyn PersistentStore>>,
}

impl CrawlEngineBuilder {
    /// DNS resolver used by the security gate
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Replaces the robots.txt cache
    pub fn robots_policy(mut self, robots: Arc<dyn RobotsPolicy>) -> Self {
        self.robots = Some(robots);
        self
    }

    /// Replaces the `scraper`-based link extractor
    pub fn link_extractor(mut self, extractor: Arc<dyn LinkExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Uses an existing persistent cache tier instead of opening one
    pub fn persistent_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validates the configuration and wires the components together
    pub fn build(self) -> crate::Result<CrawlEngine> {
        let config = self.config;
        validate(&config)?;

        let gate = Arc::new(match self.resolver {
            Some(resolver) => SecurityGate::with_resolver(&config.security, resolver),
            None => SecurityGate::new(&config.security),
        });
        let cache = Arc::new(match self.store {
            Some(store) => CacheLayer::with_store(&config.cache, store)?,
            None => CacheLayer::new(&config.cache)?,
        });
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let connections = Arc::new(ConnectionManager::new(
            &config.connections,
            &config.user_agent.user_agent_string(),
        )?);

        let fetcher = Arc::new(FetchExecutor::new(
            Arc::clone(&gate),
            Arc::clone(&cache),
            Arc::clone(&rate_limiter),
            Arc::clone(&connections),
            config.retry.clone(),
        ));

        let robots: Arc<dyn RobotsPolicy> = match self.robots {
            Some(robots) => robots,
            None => Arc::new(RobotsCache::new(
                Arc::clone(&gate),
                Arc::clone(&rate_limiter),
                Arc::clone(&connections),
                config.user_agent.crawler_name.clone(),
            )),
        };
        let extractor: Arc<dyn LinkExtractor> = match self.extractor {
            Some(extractor) => extractor,
            None => Arc::new(HtmlLinkExtractor::new()),
        };

        Ok(CrawlEngine {
            config,
            gate,
            cache,
            rate_limiter,
            connections,
            fetcher,
            robots,
            extractor,
        })
    }
}

impl CrawlEngine {
    /// Builds an engine with the default collaborators
    pub fn new(config: Config) -> crate::Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> CrawlEngineBuilder {
        CrawlEngineBuilder {
            config,
            resolver: None,
            robots: None,
            extractor: None,
            store: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Session options from the `[crawl]` section
    pub fn default_options(&self) -> CrawlOptions {
        CrawlOptions::from(&self.config.crawl)
    }

    pub fn gate(&self) -> &Arc<SecurityGate> {
        &self.gate
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn fetcher(&self) -> &Arc<FetchExecutor> {
        &self.fetcher
    }

    /// Starts the periodic cache sweep; stops when `cancel` fires
    pub fn start_cache_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        Arc::clone(&self.cache).spawn_sweeper(self.config.cache.sweep_interval(), cancel)
    }

    /// Runs one crawl session
    ///
    /// # Arguments
    ///
    /// * `seed` - Starting URL; normalized before use
    /// * `options` - Session limits and filters, validated first
    /// * `cancel` - Aborts pending and in-flight fetches when fired
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlSummary)` - The session ran; per-page failures are in the results
    /// * `Err(SluiceError)` - Invalid options or an unparseable seed; nothing was dispatched
    pub async fn crawl(
        &self,
        seed: &str,
        options: CrawlOptions,
        cancel: CancellationToken,
    ) -> crate::Result<CrawlSummary> {
        options.validate()?;
        let seed_entry = Url::parse(seed.trim())
            .map_err(|e| UrlError::Parse(e.to_string()))
            .and_then(|url| FrontierEntry::new(url, 0, None))
            .map_err(|e| SluiceError::InvalidSeed {
                url: seed.to_string(),
                reason: e.to_string(),
            })?;
        let seed_url = seed_entry.key.clone();
        let scope = LinkScope::new(&seed_url, &options)?;

        let started_at = Utc::now();
        let started = Instant::now();
        let mut state = SessionState::Init;
        let mut session = Session::new(&options);

        info!(
            seed = %seed_url,
            max_depth = options.max_depth,
            max_pages = options.max_pages,
            concurrency = options.concurrency,
            "Starting crawl session"
        );

        session.found.insert(seed_url.to_string());
        if options.respect_robots && !self.robots.is_allowed(&seed_entry.url).await {
            session.skip(seed_entry.url.to_string(), 0, None, SkipReason::RobotsDisallowed);
        } else {
            session.frontier.push(seed_entry);
        }
        state.transition(SessionState::Running)?;

        let context = Arc::new(PageContext {
            fetcher: Arc::clone(&self.fetcher),
            robots: Arc::clone(&self.robots),
            extractor: Arc::clone(&self.extractor),
            scope,
            respect_robots: options.respect_robots,
            extract_content: options.extract_content,
        });

        let end = self.run_session(&mut session, &context, &options, &cancel).await;
        state.transition(end)?;

        let summary = session.into_summary(&seed_url, &options, end, started_at, started);
        state.transition(SessionState::Done)?;

        info!(
            seed = %summary.url,
            outcome = %summary.outcome,
            pages = summary.pages_crawled,
            errors = summary.errors,
            duration_ms = summary.duration_ms,
            "Crawl session finished"
        );
        Ok(summary)
    }

    /// Dispatches until the frontier drains, the page limit is hit, or the
    /// session is interrupted; returns the outcome state
    async fn run_session(
        &self,
        session: &mut Session,
        context: &Arc<PageContext>,
        options: &CrawlOptions,
        cancel: &CancellationToken,
    ) -> SessionState {
        let max_pages = options.max_pages as usize;
        let concurrency = options.concurrency as usize;
        let mut workers: JoinSet<PageOutcome> = JoinSet::new();

        let deadline = tokio::time::sleep(options.session_timeout);
        tokio::pin!(deadline);

        let end = loop {
            if cancel.is_cancelled() {
                break SessionState::Cancelled;
            }

            while workers.len() < concurrency && session.visited.len() < max_pages {
                let Some(depth) = session.frontier.next_depth() else {
                    break;
                };
                if options.wait_for_level
                    && session.shallowest_in_flight().is_some_and(|d| d < depth)
                {
                    break;
                }
                let Some(entry) = session.frontier.pop() else {
                    break;
                };

                session.dispatch(&entry);
                let explore = entry.depth < options.max_depth;
                let context = Arc::clone(context);
                workers.spawn(async move {
                    let fallback = entry.clone();
                    AssertUnwindSafe(context.process(entry, explore))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| PageOutcome::panicked(fallback))
                });
            }

            if workers.is_empty() {
                break if session.visited.len() >= max_pages {
                    SessionState::LimitReached
                } else {
                    SessionState::Drained
                };
            }

            let interrupted = tokio::select! {
                biased;
                _ = cancel.cancelled() => Some(SessionState::Cancelled),
                _ = &mut deadline => Some(SessionState::TimedOut),
                joined = workers.join_next() => {
                    match joined {
                        Some(Ok(outcome)) => session.complete(outcome),
                        Some(Err(e)) => error!(error = %e, "Crawl worker failed"),
                        None => {}
                    }
                    None
                }
            };
            if let Some(end) = interrupted {
                break end;
            }
        };

        if end.is_interrupted() {
            warn!(state = %end, in_flight = workers.len(), "Crawl session interrupted");
            workers.abort_all();
            while let Some(joined) = workers.join_next().await {
                if let Ok(outcome) = joined {
                    session.record(outcome);
                }
            }
            session.abandon_in_flight(end);
        }

        end
    }
}

/// A link found on a page, after the worker-side checks
enum Discovery {
    /// In scope; the session decides whether to enqueue. `url` is the link
    /// as found (fragment removed), `key` its normalized form
    Candidate { url: Url, key: Url },
    Skipped { url: String, reason: SkipReason },
}

/// What a worker hands back for one entry
struct PageOutcome {
    entry: FrontierEntry,
    result: PageResult,
    discovered: Vec<Discovery>,
}

impl PageOutcome {
    fn panicked(entry: FrontierEntry) -> Self {
        error!(url = %entry.url, "Page worker panicked");
        Self {
            result: PageResult::failed(
                entry.url.as_str(),
                entry.depth,
                entry.discovered_from.clone(),
                "worker panicked".to_string(),
            ),
            entry,
            discovered: Vec::new(),
        }
    }
}

/// Everything a worker needs, shared by the session's workers
struct PageContext {
    fetcher: Arc<FetchExecutor>,
    robots: Arc<dyn RobotsPolicy>,
    extractor: Arc<dyn LinkExtractor>,
    scope: LinkScope,
    respect_robots: bool,
    extract_content: bool,
}

impl PageContext {
    async fn process(&self, entry: FrontierEntry, explore: bool) -> PageOutcome {
        let page = match self.fetcher.fetch(entry.url.as_str()).await {
            Ok(page) => page,
            Err(e) => {
                debug!(url = %entry.url, error = %e, "Page failed");
                let mut result = PageResult::failed(
                    entry.url.as_str(),
                    entry.depth,
                    entry.discovered_from.clone(),
                    e.to_string(),
                );
                result.status_code = e.status_code();
                return PageOutcome {
                    entry,
                    result,
                    discovered: Vec::new(),
                };
            }
        };

        let is_html = page
            .content_type
            .as_deref()
            .map_or(true, |ct| ct.to_ascii_lowercase().contains("html"));
        let parsed = if is_html {
            let base = Url::parse(&page.final_url).unwrap_or_else(|_| entry.url.clone());
            self.extractor.extract(&page.body, &base)
        } else {
            ParsedPage::default()
        };

        let discovered = self.classify(&parsed.links, explore).await;
        let result = PageResult {
            url: entry.url.to_string(),
            depth: entry.depth,
            discovered_from: entry.discovered_from.clone(),
            title: parsed.title,
            content: self.extract_content.then(|| page.body.clone()),
            links_count: parsed.links.len(),
            content_length: page.body.len(),
            status_code: Some(page.status),
            from_cache: page.from_cache,
            timestamp: Utc::now(),
            error: None,
        };

        PageOutcome {
            entry,
            result,
            discovered,
        }
    }

    /// Keys links by their normalized form and applies scope and robots checks
    ///
    /// Links found past the depth limit are only normalized; the session
    /// records them as skipped without consulting robots.txt.
    async fn classify(&self, links: &[String], explore: bool) -> Vec<Discovery> {
        let mut discovered = Vec::with_capacity(links.len());

        for link in links {
            let keyed = Url::parse(link).ok().and_then(|mut url| {
                url.set_fragment(None);
                let key = normalize_parsed(url.clone()).ok()?;
                Some((url, key))
            });
            let (url, key) = match keyed {
                Some(keyed) => keyed,
                None => {
                    discovered.push(Discovery::Skipped {
                        url: link.clone(),
                        reason: SkipReason::InvalidUrl,
                    });
                    continue;
                }
            };

            if explore {
                if let Some(reason) = SkipReason::from_scope(self.scope.check(&url)) {
                    discovered.push(Discovery::Skipped {
                        url: url.to_string(),
                        reason,
                    });
                    continue;
                }
                if self.respect_robots && !self.robots.is_allowed(&url).await {
                    discovered.push(Discovery::Skipped {
                        url: url.to_string(),
                        reason: SkipReason::RobotsDisallowed,
                    });
                    continue;
                }
            }

            discovered.push(Discovery::Candidate { url, key });
        }

        discovered
    }
}

/// Mutable state of one session, owned by the dispatch loop
struct Session {
    frontier: Frontier,
    visited: VisitedSet,
    in_flight: HashMap<String, FrontierEntry>,
    found: HashSet<String>,
    results: Vec<PageResult>,
    skipped: Vec<SkippedUrl>,
    max_depth: u32,
    max_pages: usize,
}

impl Session {
    fn new(options: &CrawlOptions) -> Self {
        Self {
            frontier: Frontier::new(),
            visited: VisitedSet::new(),
            in_flight: HashMap::new(),
            found: HashSet::new(),
            results: Vec::new(),
            skipped: Vec::new(),
            max_depth: options.max_depth,
            max_pages: options.max_pages as usize,
        }
    }

    fn dispatch(&mut self, entry: &FrontierEntry) {
        self.visited.insert(&entry.key);
        self.in_flight
            .insert(entry.key.as_str().to_string(), entry.clone());
        debug!(url = %entry.url, depth = entry.depth, "Dispatching");
    }

    fn shallowest_in_flight(&self) -> Option<u32> {
        self.in_flight.values().map(|e| e.depth).min()
    }

    fn skip(&mut self, url: String, depth: u32, discovered_from: Option<String>, reason: SkipReason) {
        self.skipped.push(SkippedUrl {
            url,
            depth,
            discovered_from,
            reason,
        });
    }

    /// Records a finished page without following its links
    fn record(&mut self, outcome: PageOutcome) {
        self.in_flight.remove(outcome.entry.key.as_str());
        self.results.push(outcome.result);
    }

    /// Records a finished page and enqueues its new links
    fn complete(&mut self, outcome: PageOutcome) {
        let PageOutcome {
            entry,
            result,
            discovered,
        } = outcome;
        let depth = entry.depth + 1;
        let from = entry.url.to_string();

        for discovery in discovered {
            match discovery {
                Discovery::Skipped { url, reason } => {
                    let key = normalize_url(&url).map_or_else(|_| url.clone(), |k| k.to_string());
                    self.found.insert(key);
                    self.skip(url, depth, Some(from.clone()), reason);
                }
                Discovery::Candidate { url, key } => {
                    self.found.insert(key.to_string());
                    let reason = if self.frontier.has_seen(&key) {
                        Some(SkipReason::AlreadySeen)
                    } else if depth > self.max_depth {
                        Some(SkipReason::DepthLimit)
                    } else if self.visited.len() + self.frontier.len() >= self.max_pages {
                        Some(SkipReason::PageLimit)
                    } else {
                        None
                    };

                    match reason {
                        Some(reason) => self.skip(url.to_string(), depth, Some(from.clone()), reason),
                        None => {
                            self.frontier.push(FrontierEntry {
                                url,
                                key,
                                depth,
                                discovered_from: Some(from.clone()),
                            });
                        }
                    }
                }
            }
        }

        self.record(PageOutcome {
            entry,
            result,
            discovered: Vec::new(),
        });
    }

    /// Turns entries still in flight after an interruption into page errors
    fn abandon_in_flight(&mut self, end: SessionState) {
        let mut abandoned: Vec<FrontierEntry> = self.in_flight.drain().map(|(_, e)| e).collect();
        abandoned.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.url.as_str().cmp(b.url.as_str())));

        for entry in abandoned {
            self.results.push(PageResult::failed(
                entry.url.as_str(),
                entry.depth,
                entry.discovered_from,
                format!("aborted: session {}", end),
            ));
        }
    }

    fn into_summary(
        self,
        seed: &Url,
        options: &CrawlOptions,
        end: SessionState,
        started_at: chrono::DateTime<Utc>,
        started: Instant,
    ) -> CrawlSummary {
        let elapsed = started.elapsed();
        let pages_crawled = self.results.iter().filter(|r| r.is_success()).count();
        let errors = self.results.len() - pages_crawled;
        let seconds = elapsed.as_secs_f64();

        CrawlSummary {
            url: seed.to_string(),
            crawl_depth: options.max_depth,
            pages_crawled,
            pages_found: self.found.len(),
            errors,
            duration_ms: elapsed.as_millis() as u64,
            pages_per_second: if seconds > 0.0 {
                pages_crawled as f64 / seconds
            } else {
                0.0
            },
            outcome: CrawlOutcome::from_state(end).unwrap_or(CrawlOutcome::Completed),
            started_at,
            results: self.results,
            skipped: self.skipped,
        }
    }
}
