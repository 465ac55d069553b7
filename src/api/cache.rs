// src/api/cache.rs
//! Time-boxed response cache keyed by endpoint + normalized query parameters.
//!
//! Entries expire after the configured TTL and are treated as absent once
//! expired. The cache is bounded: when an insert pushes it past
//! `max_entries`, a batch of the oldest entries (by insertion time) is
//! dropped. Reads do not refresh recency, so this is not an LRU.

use dashmap::DashMap;
use log::debug;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::form_urlencoded;

use crate::config::GovernorConfig;

/// Flat query parameters. A `BTreeMap` keeps them sorted, which makes the
/// cache key independent of insertion order.
pub type RequestParams = BTreeMap<String, String>;

/// Builds [`RequestParams`] from `(name, value)` pairs of any displayable value.
pub fn params<I, K, V>(pairs: I) -> RequestParams
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: ToString,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.to_string()))
        .collect()
}

/// Trims whitespace and trailing slashes and guarantees a leading slash.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Deterministic cache key: `/endpoint?a=1&b=2` with parameters in sorted,
/// form-encoded order. Parameters are taken verbatim, exactly as they are
/// sent upstream.
pub fn cache_key(endpoint: &str, params: &RequestParams) -> String {
    let endpoint = normalize_endpoint(endpoint);
    if params.is_empty() {
        return endpoint;
    }
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish();
    format!("{}?{}", endpoint, query)
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Arc<Value>,
    pub cached_at: Instant,
}

impl CacheEntry {
    pub fn new(data: Arc<Value>) -> Self {
        Self {
            data,
            cached_at: Instant::now(),
        }
    }

    pub fn is_valid(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() < ttl
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CacheMetrics {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
    eviction_batch: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize, eviction_batch: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            eviction_batch,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &GovernorConfig) -> Self {
        Self::new(
            config.cache_ttl(),
            config.max_cache_entries,
            config.cache_eviction_batch,
        )
    }

    /// Looks up a valid entry and records a hit or a miss.
    pub fn get(&self, key: &str) -> Option<Arc<Value>> {
        match self.lookup(key) {
            Some(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("🎯 Cache HIT for {}", key);
                Some(data)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("📡 Cache MISS for {}", key);
                None
            }
        }
    }

    /// Same as [`get`](Self::get) without touching the hit/miss counters.
    pub fn peek(&self, key: &str) -> Option<Arc<Value>> {
        self.lookup(key)
    }

    fn lookup(&self, key: &str) -> Option<Arc<Value>> {
        // The shard guard must be released before any removal on the same key.
        let found = self
            .entries
            .get(key)
            .map(|entry| (entry.is_valid(self.ttl), Arc::clone(&entry.data)));

        match found {
            Some((true, data)) => Some(data),
            Some((false, _)) => {
                let ttl = self.ttl;
                self.entries.remove_if(key, |_, entry| !entry.is_valid(ttl));
                debug!("⏰ Cache entry expired for {}", key);
                None
            }
            None => None,
        }
    }

    /// Stores (or overwrites) an entry stamped with the current time.
    pub fn insert(&self, key: String, data: Arc<Value>) {
        self.entries.insert(key.clone(), CacheEntry::new(data));
        debug!("💾 Cached response for {} (cache size: {})", key, self.entries.len());

        if self.entries.len() > self.max_entries {
            self.purge_expired();
        }
        if self.entries.len() > self.max_entries {
            self.evict_oldest(&key);
        }
    }

    /// Drops a batch of the oldest entries, at least enough to get back under
    /// the bound. `keep` (the entry just written) is never a candidate.
    fn evict_oldest(&self, keep: &str) {
        let overflow = self.entries.len().saturating_sub(self.max_entries);

        let mut by_age: Vec<(String, Instant)> = self
            .entries
            .iter()
            .filter(|entry| entry.key().as_str() != keep)
            .map(|entry| (entry.key().clone(), entry.value().cached_at))
            .collect();
        let count = self.eviction_batch.max(overflow).min(by_age.len());
        if count == 0 {
            return;
        }
        by_age.sort_by_key(|(_, cached_at)| *cached_at);

        for (key, _) in by_age.into_iter().take(count) {
            self.entries.remove(&key);
        }
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        debug!("🧹 Evicted {} oldest cache entries (cache size: {})", count, self.entries.len());
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.is_valid(ttl));
        before.saturating_sub(self.entries.len())
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_cache_key_is_order_independent() {
        let mut a = RequestParams::new();
        a.insert("team".into(), "33".into());
        a.insert("season".into(), "2023".into());
        let b = params([("season", 2023), ("team", 33)]);

        assert_eq!(cache_key("fixtures/", &a), cache_key("/fixtures", &b));
        assert_eq!(cache_key("/fixtures", &b), "/fixtures?season=2023&team=33");
        assert_eq!(cache_key(" status ", &RequestParams::new()), "/status");
    }

    #[test]
    fn test_cache_key_distinguishes_reserved_characters_and_whitespace() {
        let packed = params([("a", "1&b=2")]);
        let split = params([("a", "1"), ("b", "2")]);
        assert_ne!(cache_key("/fixtures", &packed), cache_key("/fixtures", &split));

        let padded = params([("name", " Arsenal")]);
        let plain = params([("name", "Arsenal")]);
        assert_ne!(cache_key("/teams", &padded), cache_key("/teams", &plain));

        assert_eq!(
            cache_key("/teams", &params([("name", "Brighton & Hove Albion")])),
            "/teams?name=Brighton+%26+Hove+Albion"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(60), 10, 2);
        cache.insert("/fixtures?date=2024-01-15".into(), Arc::new(json!({"results": 3})));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("/fixtures?date=2024-01-15").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("/fixtures?date=2024-01-15").is_none());
        assert!(cache.is_empty());

        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.hit_rate(), 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_evicts_oldest_batch() {
        let cache = ResponseCache::new(Duration::from_secs(600), 5, 2);
        for i in 0..5 {
            cache.insert(format!("/teams?id={}", i), Arc::new(json!(i)));
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        assert_eq!(cache.len(), 5);

        cache.insert("/teams?id=5".into(), Arc::new(json!(5)));
        assert_eq!(cache.len(), 4);
        assert!(cache.peek("/teams?id=0").is_none());
        assert!(cache.peek("/teams?id=1").is_none());
        assert!(cache.peek("/teams?id=2").is_some());
        assert!(cache.peek("/teams?id=5").is_some());
        assert_eq!(cache.metrics().evictions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_never_evicts_the_entry_just_written() {
        let cache = ResponseCache::new(Duration::from_secs(600), 2, 5);
        cache.insert("/a".into(), Arc::new(json!(1)));
        cache.insert("/b".into(), Arc::new(json!(2)));
        // Same instant for every entry: age alone cannot protect the newest
        cache.insert("/c".into(), Arc::new(json!(3)));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.peek("/c"), Some(Arc::new(json!(3))));
        assert_eq!(cache.metrics().evictions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_prefers_expired_entries() {
        let cache = ResponseCache::new(Duration::from_secs(30), 2, 1);
        cache.insert("/leagues".into(), Arc::new(json!([])));
        tokio::time::advance(Duration::from_secs(31)).await;
        cache.insert("/standings?league=39".into(), Arc::new(json!([])));
        cache.insert("/standings?league=140".into(), Arc::new(json!([])));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.metrics().evictions, 0);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = ResponseCache::new(Duration::from_secs(60), 10, 2);
        cache.insert("/a".into(), Arc::new(json!(1)));
        cache.insert("/b".into(), Arc::new(json!(2)));

        assert!(cache.invalidate("/a"));
        assert!(!cache.invalidate("/a"));
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }
}
