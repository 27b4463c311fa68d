//! In-memory byte-budget LRU cache for decoded images.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, DecodedImage};

/// Default memory budget for decoded images (64 MiB).
pub const DEFAULT_MEMORY_BUDGET: u64 = 64 * 1024 * 1024;

/// Cost function for cached values.
///
/// The cache accounts capacity in cost units (bytes for images), so the
/// same cache works for any payload that can report its footprint.
pub trait CacheCost {
    /// Approximate footprint of this value in cost units.
    fn cost(&self) -> u64;
}

impl CacheCost for DecodedImage {
    fn cost(&self) -> u64 {
        DecodedImage::cost(self)
    }
}

/// Thread-safe LRU cache bounded by total value cost.
///
/// The fast path is fully synchronous: a `parking_lot` mutex around the
/// recency list, no I/O, no awaiting. Eviction happens inline on insert.
pub struct MemoryCache<V: CacheCost> {
    inner: Mutex<CacheInner<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct CacheInner<V> {
    entries: LruCache<CacheKey, Arc<V>>,
    used: u64,
    capacity: u64,
}

impl<V: CacheCost> MemoryCache<V> {
    /// Creates a cache with the given cost budget.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                used: 0,
                capacity,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks up a key, promoting it to most-recently-used on a hit.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<V>> {
        let mut inner = self.inner.lock();
        if let Some(value) = inner.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(value.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    /// Inserts a value unless the key is already resident.
    ///
    /// First writer wins: a concurrent decode arriving second is silently
    /// dropped, though the probe still counts as an access for recency.
    /// Values costing more than the whole budget are never admitted.
    /// Evicts least-recently-used entries until the budget holds.
    pub fn put(&self, key: CacheKey, value: Arc<V>) {
        let mut inner = self.inner.lock();

        if inner.entries.get(&key).is_some() {
            trace!(key = %key, "Key already resident, keeping first writer's value");
            return;
        }

        let cost = value.cost();
        if cost > inner.capacity {
            debug!(key = %key, cost = cost, capacity = inner.capacity,
                "Value exceeds entire memory budget, not caching");
            return;
        }

        debug!(key = %key, cost = cost, "Storing image in memory cache");
        inner.entries.push(key, value);
        inner.used += cost;

        while inner.used > inner.capacity {
            if let Some((evicted_key, evicted)) = inner.entries.pop_lru() {
                inner.used -= evicted.cost();
                debug!(key = %evicted_key, "Evicted least-recently-used entry");
            } else {
                break;
            }
        }
    }

    /// Current number of resident entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total cost of resident entries.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.inner.lock().used
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            entries: self.len(),
            used_bytes: self.used_bytes(),
        }
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached entries.
    pub entries: usize,
    /// Total cost of resident entries in bytes.
    pub used_bytes: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} entries, {} bytes, {:.1}% hit rate ({} hits, {} misses)",
            self.entries, self.used_bytes, self.hit_rate, self.hits, self.misses
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ResourceId;

    struct Sized(u64);

    impl CacheCost for Sized {
        fn cost(&self) -> u64 {
            self.0
        }
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::derive(&ResourceId::new(name))
    }

    #[test]
    fn test_put_and_get() {
        let cache = MemoryCache::new(100);
        cache.put(key("a"), Arc::new(Sized(10)));

        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("missing")).is_none());
        assert_eq!(cache.used_bytes(), 10);
    }

    #[test]
    fn test_budget_never_exceeded() {
        let cache = MemoryCache::new(30);
        for name in ["a", "b", "c", "d", "e"] {
            cache.put(key(name), Arc::new(Sized(10)));
            assert!(cache.used_bytes() <= 30);
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_eviction_is_strict_lru() {
        let cache = MemoryCache::new(30);
        cache.put(key("a"), Arc::new(Sized(10)));
        cache.put(key("b"), Arc::new(Sized(10)));
        cache.put(key("c"), Arc::new(Sized(10)));

        // Touch "a" so "b" becomes the oldest.
        let _ = cache.get(&key("a"));

        cache.put(key("d"), Arc::new(Sized(10)));

        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("c")).is_some());
        assert!(cache.get(&key("d")).is_some());
    }

    #[test]
    fn test_first_writer_wins() {
        let cache = MemoryCache::new(100);
        cache.put(key("a"), Arc::new(Sized(10)));
        cache.put(key("a"), Arc::new(Sized(99)));

        // The second put is dropped; accounting still reflects the first.
        assert_eq!(cache.used_bytes(), 10);
        assert_eq!(cache.get(&key("a")).unwrap().0, 10);
    }

    #[test]
    fn test_oversized_value_not_admitted() {
        let cache = MemoryCache::new(50);
        cache.put(key("huge"), Arc::new(Sized(51)));

        assert!(cache.get(&key("huge")).is_none());
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn test_stats() {
        let cache = MemoryCache::new(100);
        cache.put(key("a"), Arc::new(Sized(10)));

        let _ = cache.get(&key("a"));
        let _ = cache.get(&key("missing"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.used_bytes, 10);
    }
}
