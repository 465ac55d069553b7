// src/api/stats.rs
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::cache::CacheMetrics;

/// Live counters updated by the dispatcher and read by [`GovernorStats`] snapshots.
#[derive(Debug, Default)]
pub struct GovernorCounters {
    pub queued: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub dispatched: AtomicU64,
    pub succeeded: AtomicU64,
    pub retried: AtomicU64,
    pub failed: AtomicU64,
    pub coalesced: AtomicU64,
    pub cancelled: AtomicU64,
    pub rate_limited: AtomicU64,
}

impl GovernorCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set(gauge: &AtomicUsize, value: usize) {
        gauge.store(value, Ordering::Relaxed);
    }
}

/// Read-only diagnostics snapshot.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GovernorStats {
    pub cache: CacheMetrics,
    pub cache_hit_rate: f64,
    pub queued: usize,
    pub in_flight: usize,
    pub dispatched: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub failed: u64,
    pub coalesced: u64,
    pub cancelled: u64,
    pub rate_limited: u64,
}

impl GovernorStats {
    pub fn snapshot(counters: &GovernorCounters, cache: CacheMetrics) -> Self {
        Self {
            cache_hit_rate: cache.hit_rate(),
            cache,
            queued: counters.queued.load(Ordering::Relaxed),
            in_flight: counters.in_flight.load(Ordering::Relaxed),
            dispatched: counters.dispatched.load(Ordering::Relaxed),
            succeeded: counters.succeeded.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            rate_limited: counters.rate_limited.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for GovernorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cache: {} entries, {} hits / {} misses ({:.1}%), queue: {}, in flight: {}, dispatched: {}, retried: {}, failed: {}, coalesced: {}",
            self.cache.entries,
            self.cache.hits,
            self.cache.misses,
            self.cache_hit_rate * 100.0,
            self.queued,
            self.in_flight,
            self.dispatched,
            self.retried,
            self.failed,
            self.coalesced
        )
    }
}
