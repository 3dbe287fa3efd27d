use crate::config::ConnectionConfig;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct BackpressureState {
    last_check: Option<Instant>,
    ratio: f64,
    active: bool,
    /// Consecutive delayed admissions since backpressure became active
    consecutive: u32,
}

/// Admission throttle driven by connection utilization
///
/// Utilization is the requesting agent's demand over its `max_sockets`,
/// recomputed at most once per check interval. Demand counts requests queued
/// for a socket as well as those holding one, so it can exceed 1. While it stays above the threshold every admission is
/// delayed by `min(base * 2^n, max)`, `n` counting delayed admissions, so the
/// delay never decreases until utilization falls back below the threshold.
#[derive(Debug)]
pub struct Backpressure {
    state: Mutex<BackpressureState>,
    max_sockets: usize,
    threshold: f64,
    check_interval: Duration,
    base_delay: Duration,
    max_delay: Duration,
}

impl Backpressure {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            state: Mutex::new(BackpressureState {
                last_check: None,
                ratio: 0.0,
                active: false,
                consecutive: 0,
            }),
            max_sockets: config.max_sockets.max(1),
            threshold: config.backpressure_threshold,
            check_interval: Duration::from_millis(config.backpressure_check_interval_ms),
            base_delay: Duration::from_millis(config.backpressure_base_delay_ms),
            max_delay: Duration::from_millis(config.backpressure_max_delay_ms),
        }
    }

    /// Returns the delay to apply before admitting a new request, if any
    ///
    /// # Arguments
    ///
    /// * `demand` - Requests on the agent, queued or in flight
    pub fn admission_delay(&self, demand: usize) -> Option<Duration> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = Instant::now();
        let due = state
            .last_check
            .map_or(true, |last| now.duration_since(last) >= self.check_interval);

        if due {
            state.last_check = Some(now);
            state.ratio = demand as f64 / self.max_sockets as f64;
            let was_active = state.active;
            state.active = state.ratio > self.threshold;

            if !state.active {
                state.consecutive = 0;
            }
            if state.active != was_active {
                debug!(
                    ratio = state.ratio,
                    active = state.active,
                    "Backpressure state changed"
                );
            }
        }

        if !state.active {
            return None;
        }

        let exponent = state.consecutive.min(20);
        state.consecutive = state.consecutive.saturating_add(1);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        Some(delay)
    }

    /// Returns true while admissions are being delayed
    pub fn is_active(&self) -> bool {
        self.state.lock().map(|s| s.active).unwrap_or(false)
    }

    /// Utilization ratio from the most recent check
    pub fn ratio(&self) -> f64 {
        self.state.lock().map(|s| s.ratio).unwrap_or(0.0)
    }
}
