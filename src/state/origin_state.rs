use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding request log for one origin
///
/// Holds the start time of every request admitted within the last window.
/// An origin may have a tighter limit than the global one (for instance
/// from a robots.txt `Crawl-delay`).
#[derive(Debug, Clone)]
pub struct OriginState {
    /// Admission times still inside the window, oldest first
    pub requests: VecDeque<Instant>,

    /// Requests allowed per window for this origin
    pub limit: u32,

    /// Window length for this origin
    pub window: Duration,

    /// Total requests admitted over the origin's lifetime
    pub total_requests: u64,

    /// Total time callers spent waiting for this origin
    pub total_wait: Duration,

    /// True once the limit was overridden, e.g. by `Crawl-delay`
    pub overridden: bool,

    /// Last admission, or creation if nothing was admitted yet
    pub last_used: Instant,
}

impl OriginState {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            requests: VecDeque::with_capacity(limit as usize),
            limit: limit.max(1),
            window,
            total_requests: 0,
            total_wait: Duration::ZERO,
            overridden: false,
            last_used: Instant::now(),
        }
    }

    /// Drops admission times that have left the window
    pub fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.requests.front() {
            if now.duration_since(oldest) >= self.window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }

    /// Checks if a request can be admitted now
    pub fn can_request(&mut self, now: Instant) -> bool {
        self.prune(now);
        (self.requests.len() as u32) < self.limit
    }

    /// Records that a request was admitted
    pub fn record_request(&mut self, now: Instant) {
        self.requests.push_back(now);
        self.total_requests += 1;
        self.last_used = now;
    }

    /// True if nothing is in the window and an override, if any, is older than `retention`
    pub fn is_idle(&mut self, now: Instant, retention: Duration) -> bool {
        self.prune(now);
        self.requests.is_empty()
            && (!self.overridden || now.duration_since(self.last_used) >= retention)
    }

    /// Calculates the time until the oldest logged request leaves the window
    ///
    /// Returns None if a request can be made now.
    pub fn time_until_next_request(&mut self, now: Instant) -> Option<Duration> {
        if self.can_request(now) {
            return None;
        }
        self.requests
            .front()
            .map(|&oldest| (oldest + self.window).saturating_duration_since(now))
    }

    /// Returns the number of requests currently counted in the window
    pub fn in_window(&mut self, now: Instant) -> u32 {
        self.prune(now);
        self.requests.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_request_initially() {
        let mut state = OriginState::new(2, Duration::from_secs(1));
        assert!(state.can_request(Instant::now()));
        assert_eq!(state.total_requests, 0);
    }

    #[test]
    fn test_window_fills_and_slides() {
        let mut state = OriginState::new(2, Duration::from_millis(100));
        let start = Instant::now();

        state.record_request(start);
        state.record_request(start + Duration::from_millis(40));
        assert!(!state.can_request(start + Duration::from_millis(50)));

        let wait = state
            .time_until_next_request(start + Duration::from_millis(50))
            .unwrap();
        assert_eq!(wait, Duration::from_millis(50));

        // The first entry has left, the second has not
        let later = start + Duration::from_millis(100);
        assert!(state.can_request(later));
        assert_eq!(state.in_window(later), 1);
    }

    #[test]
    fn test_idle_once_window_empties_unless_overridden() {
        let mut state = OriginState::new(2, Duration::from_millis(100));
        let start = Instant::now();
        state.record_request(start);
        assert!(!state.is_idle(start + Duration::from_millis(50), Duration::from_secs(60)));
        assert!(state.is_idle(start + Duration::from_millis(150), Duration::from_secs(60)));

        state.overridden = true;
        assert!(!state.is_idle(start + Duration::from_millis(150), Duration::from_secs(60)));
        assert!(state.is_idle(start + Duration::from_secs(61), Duration::from_secs(60)));
    }

    #[test]
    fn test_zero_limit_treated_as_one() {
        let mut state = OriginState::new(0, Duration::from_secs(1));
        let now = Instant::now();
        assert!(state.can_request(now));
        state.record_request(now);
        assert!(!state.can_request(now));
    }
}
