//! Per-origin sliding-window rate limiter
//!
//! One limiter is shared by every session of a [`CrawlEngine`](crate::CrawlEngine)
//! so politeness applies process-wide. The internal lock only guards the
//! request logs; callers never sleep while holding it, so a saturated origin
//! never delays another.

use crate::config::RateLimitConfig;
use crate::state::OriginState;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Snapshot of one origin's limiter state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginStats {
    pub limit: u32,
    pub window: Duration,
    pub in_window: u32,
    pub total_requests: u64,
    pub total_wait: Duration,
}

/// Snapshot of the whole limiter
#[derive(Debug, Clone, Default)]
pub struct RateLimiterStats {
    pub origins: HashMap<String, OriginStats>,
    pub total_requests: u64,
    pub total_wait: Duration,
}

/// Idle origins are dropped at most this often
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// How long an unused override is kept; longer than a robots.txt entry stays
/// fresh, so the refetch that re-applies it always comes first
const OVERRIDE_RETENTION: Duration = Duration::from_secs(25 * 60 * 60);

#[derive(Default)]
struct Origins {
    states: HashMap<String, OriginState>,
    /// Lifetime counters of origins already pruned
    retired_requests: u64,
    retired_wait: Duration,
    last_prune: Option<Instant>,
}

impl Origins {
    /// Drops origins with an empty window and no live override
    fn prune_idle(&mut self, now: Instant) -> usize {
        let before = self.states.len();
        let mut retired = (0u64, Duration::ZERO);
        self.states.retain(|_, state| {
            if state.is_idle(now, OVERRIDE_RETENTION) {
                retired.0 += state.total_requests;
                retired.1 += state.total_wait;
                false
            } else {
                true
            }
        });
        self.retired_requests += retired.0;
        self.retired_wait += retired.1;
        self.last_prune = Some(now);
        before - self.states.len()
    }
}

/// Sliding-window limiter keyed by origin (`scheme://host:port`)
///
/// Origins whose window has emptied are forgotten periodically; their
/// counters still show in the totals of [`RateLimiter::stats`].
pub struct RateLimiter {
    origins: Mutex<Origins>,
    default_limit: u32,
    default_window: Duration,
}

enum Admission {
    Granted,
    Wait(Duration),
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            origins: Mutex::new(Origins::default()),
            default_limit: config.requests_per_window.max(1),
            default_window: config.window(),
        }
    }

    /// Waits until a request to `origin` is permitted, then records it
    ///
    /// At most `limit` requests are admitted in any window of `window` length.
    /// When the window is full the caller sleeps until the oldest logged
    /// request leaves it, then tries again.
    ///
    /// # Returns
    ///
    /// How long the caller was delayed
    pub async fn acquire(&self, origin: &str) -> Duration {
        let started = Instant::now();

        loop {
            match self.try_admit(origin) {
                Admission::Granted => {
                    let waited = started.elapsed();
                    if !waited.is_zero() {
                        self.record_wait(origin, waited);
                        debug!(origin, waited_ms = waited.as_millis() as u64, "Rate limit delay");
                    }
                    return waited;
                }
                Admission::Wait(delay) => {
                    trace!(origin, delay_ms = delay.as_millis() as u64, "Origin window full");
                    // Never zero, or a full window would spin
                    tokio::time::sleep(delay.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Admits a request immediately if the window has room
    ///
    /// Returns true if the request was recorded.
    pub fn try_acquire(&self, origin: &str) -> bool {
        matches!(self.try_admit(origin), Admission::Granted)
    }

    fn lock(&self) -> MutexGuard<'_, Origins> {
        match self.origins.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn try_admit(&self, origin: &str) -> Admission {
        let mut origins = self.lock();
        let now = Instant::now();
        let prune_due = origins
            .last_prune
            .map_or(true, |last| now.duration_since(last) >= PRUNE_INTERVAL);
        if prune_due {
            let pruned = origins.prune_idle(now);
            if pruned > 0 {
                trace!(pruned, "Pruned idle origins");
            }
        }

        let state = origins
            .states
            .entry(origin.to_string())
            .or_insert_with(|| OriginState::new(self.default_limit, self.default_window));

        match state.time_until_next_request(now) {
            None => {
                state.record_request(now);
                Admission::Granted
            }
            Some(delay) => Admission::Wait(delay),
        }
    }

    fn record_wait(&self, origin: &str, waited: Duration) {
        if let Some(state) = self.lock().states.get_mut(origin) {
            state.total_wait += waited;
        }
    }

    /// Forgets every idle origin now, returning how many were dropped
    pub fn prune_idle(&self) -> usize {
        self.lock().prune_idle(Instant::now())
    }

    /// Origins currently tracked
    pub fn tracked_origins(&self) -> usize {
        self.lock().states.len()
    }

    /// Overrides the limit for one origin
    ///
    /// Used to apply a robots.txt `Crawl-delay`. Existing log entries are kept.
    pub fn set_origin_limit(&self, origin: &str, limit: u32, window: Duration) {
        let mut origins = self.lock();
        let state = origins
            .states
            .entry(origin.to_string())
            .or_insert_with(|| OriginState::new(self.default_limit, self.default_window));
        state.limit = limit.max(1);
        state.window = window;
        state.overridden = true;
        state.last_used = Instant::now();
        debug!(origin, limit, window_ms = window.as_millis() as u64, "Origin limit overridden");
    }

    /// Applies a minimum interval between requests if it is stricter than the default
    pub fn apply_crawl_delay(&self, origin: &str, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        // Compare rates: default_limit / default_window vs 1 / delay
        let default_interval = self.default_window / self.default_limit;
        if delay > default_interval {
            self.set_origin_limit(origin, 1, delay);
        }
    }

    /// Returns a snapshot of per-origin counters
    pub fn stats(&self) -> RateLimiterStats {
        let mut origins = self.lock();
        let now = Instant::now();
        let mut stats = RateLimiterStats {
            total_requests: origins.retired_requests,
            total_wait: origins.retired_wait,
            ..RateLimiterStats::default()
        };

        for (origin, state) in origins.states.iter_mut() {
            stats.total_requests += state.total_requests;
            stats.total_wait += state.total_wait;
            stats.origins.insert(
                origin.clone(),
                OriginStats {
                    limit: state.limit,
                    window: state.window,
                    in_window: state.in_window(now),
                    total_requests: state.total_requests,
                    total_wait: state.total_wait,
                },
            );
        }

        stats
    }
}
