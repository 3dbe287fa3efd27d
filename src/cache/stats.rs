use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Below this hit rate the cache is flagged as ineffective
const LOW_HIT_RATE: f64 = 0.5;

/// Above this share of capacity the memory tier is flagged as full
const HIGH_UTILIZATION: f64 = 0.9;

/// Recommendations need this many lookups before they mean anything
const MIN_SAMPLE: u64 = 100;

#[derive(Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub memory_hits: AtomicU64,
    pub persistent_hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub evictions: AtomicU64,
    pub expirations: AtomicU64,
    pub invalidations: AtomicU64,
    pub lookup_nanos: AtomicU64,
}

impl CacheCounters {
    pub fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn record_lookup(&self, elapsed: Duration) {
        self.lookup_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, memory_entries: usize, memory_capacity: usize) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let lookup_nanos = self.lookup_nanos.load(Ordering::Relaxed);

        CacheStats {
            hits,
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            persistent_hits: self.persistent_hits.load(Ordering::Relaxed),
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            average_lookup_us: if lookups == 0 {
                0.0
            } else {
                lookup_nanos as f64 / lookups as f64 / 1000.0
            },
            memory_entries,
            memory_capacity,
        }
    }
}

/// Cache counters at one point in time
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub memory_hits: u64,
    pub persistent_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub average_lookup_us: f64,
    pub memory_entries: usize,
    pub memory_capacity: usize,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            n => self.hits as f64 / n as f64,
        }
    }

    pub fn memory_utilization(&self) -> f64 {
        match self.memory_capacity {
            0 => 0.0,
            cap => self.memory_entries as f64 / cap as f64,
        }
    }

    /// Tuning advice derived from the counters
    pub fn recommendations(&self) -> Vec<String> {
        let mut advice = Vec::new();

        if self.lookups() >= MIN_SAMPLE && self.hit_rate() < LOW_HIT_RATE {
            advice.push(format!(
                "Low hit rate ({:.0}%): consider longer TTLs or fewer invalidations",
                self.hit_rate() * 100.0
            ));
        }

        if self.memory_utilization() > HIGH_UTILIZATION {
            advice.push(format!(
                "Memory tier is {:.0}% full: consider raising memory-capacity",
                self.memory_utilization() * 100.0
            ));
        }

        if self.sets >= MIN_SAMPLE && self.evictions * 2 > self.sets {
            advice.push(format!(
                "Frequent evictions ({} of {} writes): the working set exceeds the memory tier",
                self.evictions, self.sets
            ));
        }

        advice
    }
}
