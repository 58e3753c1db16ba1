use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by every handle of one cache.
#[derive(Default)]
pub struct StatsCounter {
    hits: AtomicU64,
    misses: AtomicU64,
    load_successes: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
    eviction_weight: AtomicU64,
}

impl StatsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A load that produced a value.
    #[inline]
    pub fn record_load_success(&self) {
        self.load_successes.fetch_add(1, Ordering::Relaxed);
    }

    /// A load that failed, was cancelled or produced no value.
    #[inline]
    pub fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// An entry removed by expiration or by the size bound.
    #[inline]
    pub fn record_eviction(&self, weight: u64) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.eviction_weight.fetch_add(weight, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Metrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        Metrics {
            hits,
            misses,
            load_successes: self.load_successes.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            eviction_weight: self.eviction_weight.load(Ordering::Relaxed),
            hit_rate: ratio(hits, hits + misses),
        }
    }
}

/// A point-in-time copy of the cache counters.
///
/// Counters are read one by one, so a snapshot taken under concurrent
/// traffic may be slightly inconsistent across fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    /// Lookups that found a live value.
    pub hits: u64,
    /// Lookups that found nothing, or only an expired entry.
    pub misses: u64,
    /// Computations that produced a value.
    pub load_successes: u64,
    /// Computations that failed, were cancelled or produced nothing.
    pub load_failures: u64,
    /// Entries removed by expiration or by the size bound.
    pub evictions: u64,
    /// Total weight of the evicted entries.
    pub eviction_weight: u64,
    /// `hits / (hits + misses)`, or `0.0` before the first lookup.
    pub hit_rate: f64,
}

impl Metrics {
    pub fn request_count(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn miss_rate(&self) -> f64 {
        ratio(self.misses, self.request_count())
    }

    pub fn load_count(&self) -> u64 {
        self.load_successes + self.load_failures
    }

    /// Share of computations that did not produce a value.
    pub fn load_failure_rate(&self) -> f64 {
        ratio(self.load_failures, self.load_count())
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = StatsCounter::new();
        for _ in 0..3 {
            stats.record_hit();
        }
        stats.record_miss();
        stats.record_load_success();
        stats.record_load_failure();
        stats.record_eviction(1);
        stats.record_eviction(5);

        let m = stats.snapshot();
        assert_eq!(m.request_count(), 4);
        assert_eq!(m.load_count(), 2);
        assert_eq!((m.evictions, m.eviction_weight), (2, 6));
        assert!((m.hit_rate - 0.75).abs() < 1e-9);
        assert!((m.miss_rate() - 0.25).abs() < 1e-9);
        assert!((m.load_failure_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn rates_are_zero_without_traffic() {
        let m = StatsCounter::default().snapshot();
        assert_eq!(m.hit_rate, 0.0);
        assert_eq!(m.miss_rate(), 0.0);
        assert_eq!(m.load_failure_rate(), 0.0);
    }
}
