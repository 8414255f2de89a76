//! Route cache keyed by `(key, strategy, read_only)`.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::router::{RoutingResult, RoutingStrategy};

/// Cache key for one routing decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteCacheKey {
    /// Raw routing key
    pub key: Vec<u8>,
    /// Strategy the route was resolved under
    pub strategy: RoutingStrategy,
    /// Whether the request was read-only
    pub read_only: bool,
}

/// A cached route with its insertion timestamp.
///
/// Freshness is judged against `inserted_at`, which is stamped exactly
/// once when the entry is stored; resolution latency is unrelated to
/// entry age and never participates in expiry.
struct CachedRoute {
    result: RoutingResult,
    inserted_at: Instant,
}

/// LRU route cache with TTL expiry.
pub struct RouteCache {
    ttl: Duration,
    entries: Mutex<LruCache<RouteCacheKey, CachedRoute>>,
}

impl RouteCache {
    /// Cache holding up to `capacity` routes for `ttl` each.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self { ttl, entries: Mutex::new(LruCache::new(capacity)) }
    }

    /// Fresh cached route for the key, if any. Expired entries are
    /// dropped on the way out.
    pub fn get(&self, key: &RouteCacheKey) -> Option<RoutingResult> {
        let Ok(mut entries) = self.entries.lock() else { return None };
        match entries.get(key) {
            Some(cached) if cached.inserted_at.elapsed() < self.ttl => {
                let mut result = cached.result.clone();
                result.cached = true;
                Some(result)
            }
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    /// Store a route.
    pub fn insert(&self, key: RouteCacheKey, result: RoutingResult) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(key, CachedRoute { result, inserted_at: Instant::now() });
        }
    }

    /// Drop every route that resolved through the given shard.
    pub fn evict_shard(&self, shard_id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            let stale: Vec<RouteCacheKey> = entries
                .iter()
                .filter(|(_, cached)| cached.result.shard_info.id == shard_id)
                .map(|(key, _)| key.clone())
                .collect();
            for key in stale {
                entries.pop(&key);
            }
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// Cached route count.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
