//! Bounded in-memory response cache.
//!
//! Entries are bounded twice: by total byte size and by entry count. When
//! an insert would exceed either bound, least-recently-used entries are
//! evicted until the new entry fits. Expiry is lazy: an expired entry is
//! removed when a lookup observes it. Recency updates on hits go through
//! an atomic timestamp so lookups stay on the shared lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{GatewayError, Result};
use crate::response::ProxyResponse;

/// Derives a cache key from the request components: hex-encoded SHA-256
/// over method, path, query and body bytes, in that order.
///
/// Header values and cookies are deliberately excluded; routes whose
/// responses vary on headers must not enable caching.
pub fn cache_key(method: &str, path: &str, query: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(path.as_bytes());
    hasher.update(query.as_bytes());
    hasher.update(body);
    hex::encode(hasher.finalize())
}

struct CacheEntry {
    response: ProxyResponse,
    /// Unix timestamp after which the entry is expired.
    deadline: i64,
    /// Unix nanosecond timestamp of the last hit, updated atomically so
    /// reads never need the write lock.
    last_used: AtomicI64,
    size: u64,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    total_bytes: u64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub capacity: usize,
    pub max_bytes: u64,
}

/// Thread-safe response cache with TTL and LRU eviction.
pub struct ResponseCache {
    inner: RwLock<CacheInner>,
    capacity: usize,
    max_bytes: u64,
}

impl ResponseCache {
    /// Creates a cache bounded to `capacity` entries and `max_size_mb`
    /// megabytes.
    pub fn new(capacity: usize, max_size_mb: u64) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                entries: HashMap::with_capacity(capacity),
                total_bytes: 0,
            }),
            capacity,
            max_bytes: max_size_mb * 1024 * 1024,
        }
    }

    /// Returns the cached response for `key` if present and not expired.
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<ProxyResponse> {
        self.get_at(key, unix_now(), unix_now_nanos())
    }

    fn get_at(&self, key: &str, now: i64, now_nanos: i64) -> Option<ProxyResponse> {
        let expired = {
            let inner = self.inner.read().unwrap();
            let entry = inner.entries.get(key)?;
            if entry.deadline < now {
                true
            } else {
                entry.last_used.store(now_nanos, Ordering::Relaxed);
                return Some(entry.response.clone());
            }
        };

        if expired {
            let mut inner = self.inner.write().unwrap();
            // Re-check under the write lock; the entry may have been
            // replaced with a fresh one in the meantime.
            if inner
                .entries
                .get(key)
                .is_some_and(|entry| entry.deadline < now)
            {
                if let Some(entry) = inner.entries.remove(key) {
                    inner.total_bytes -= entry.size;
                }
            }
        }
        None
    }

    /// Stores `response` under `key` for `ttl_seconds`.
    ///
    /// A non-positive TTL is a no-op. Replacing an existing key releases
    /// the old entry's size before the new one is accounted. Entries are
    /// evicted least-recently-used first until the insert fits both
    /// bounds; an entry that alone exceeds the byte bound is refused with
    /// [`GatewayError::CacheTooLarge`].
    pub fn set(&self, key: &str, response: ProxyResponse, ttl_seconds: i64) -> Result<()> {
        self.set_at(key, response, ttl_seconds, unix_now(), unix_now_nanos())
    }

    fn set_at(
        &self,
        key: &str,
        response: ProxyResponse,
        ttl_seconds: i64,
        now: i64,
        now_nanos: i64,
    ) -> Result<()> {
        if ttl_seconds <= 0 {
            return Ok(());
        }

        let size = response.approx_size(key);
        if size > self.max_bytes {
            return Err(GatewayError::CacheTooLarge {
                size,
                max: self.max_bytes,
            });
        }

        let mut inner = self.inner.write().unwrap();
        if let Some(old) = inner.entries.remove(key) {
            inner.total_bytes -= old.size;
        }

        while inner.total_bytes + size > self.max_bytes || inner.entries.len() >= self.capacity
        {
            if !evict_lru(&mut inner) {
                break;
            }
        }

        inner.entries.insert(
            key.to_owned(),
            CacheEntry {
                response,
                deadline: now + ttl_seconds,
                last_used: AtomicI64::new(now_nanos),
                size,
            },
        );
        inner.total_bytes += size;
        Ok(())
    }

    /// Drops all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.entries.clear();
        inner.total_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read().unwrap();
        CacheStats {
            entries: inner.entries.len(),
            total_bytes: inner.total_bytes,
            capacity: self.capacity,
            max_bytes: self.max_bytes,
        }
    }
}

/// Removes the entry with the oldest `last_used` timestamp. Returns false
/// when the cache is empty.
fn evict_lru(inner: &mut CacheInner) -> bool {
    let victim = inner
        .entries
        .iter()
        .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
        .map(|(key, _)| key.clone());

    match victim {
        Some(key) => {
            if let Some(entry) = inner.entries.remove(&key) {
                inner.total_bytes -= entry.size;
            }
            true
        }
        None => false,
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn unix_now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};

    fn response(body: &'static [u8]) -> ProxyResponse {
        ProxyResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(body))
    }

    fn sized_response(len: usize) -> ProxyResponse {
        ProxyResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from(vec![0u8; len]),
        )
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let cache = ResponseCache::new(10, 1);
        cache.set("k", response(b"payload"), 60).unwrap();

        let hit = cache.get("k").unwrap();
        assert_eq!(hit.body.as_ref(), b"payload");
    }

    #[test]
    fn test_miss_on_unknown_key() {
        let cache = ResponseCache::new(10, 1);
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn test_non_positive_ttl_is_a_no_op() {
        let cache = ResponseCache::new(10, 1);
        cache.set("k", response(b"x"), 0).unwrap();
        cache.set("k", response(b"x"), -5).unwrap();
        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_expired_entry_is_removed_on_observation() {
        let cache = ResponseCache::new(10, 1);
        let now = unix_now();
        cache.set_at("k", response(b"x"), 30, now, 1).unwrap();

        assert!(cache.get_at("k", now + 31, 2).is_none());
        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_bytes, 0);
    }

    #[test]
    fn test_entry_valid_just_before_deadline() {
        let cache = ResponseCache::new(10, 1);
        let now = unix_now();
        cache.set_at("k", response(b"x"), 30, now, 1).unwrap();
        assert!(cache.get_at("k", now + 30, 2).is_some());
    }

    #[test]
    fn test_replacing_key_releases_old_size() {
        let cache = ResponseCache::new(10, 1);
        cache.set("k", sized_response(500), 60).unwrap();
        let after_first = cache.stats().total_bytes;

        cache.set("k", sized_response(100), 60).unwrap();
        let after_second = cache.stats().total_bytes;
        assert_eq!(after_second, after_first - 400);
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn test_size_accounting_matches_entries() {
        let cache = ResponseCache::new(10, 1);
        cache.set("a", sized_response(100), 60).unwrap();
        cache.set("bb", sized_response(200), 60).unwrap();

        // key lengths count toward the total
        assert_eq!(cache.stats().total_bytes, 101 + 202);
    }

    #[test]
    fn test_lru_eviction_under_byte_pressure() {
        // 1 MB budget, ~400 KB entries: the third insert must evict the
        // least recently used of the first two.
        let cache = ResponseCache::new(1000, 1);
        let now = unix_now();
        cache.set_at("a", sized_response(400_000), 60, now, 1).unwrap();
        cache.set_at("b", sized_response(400_000), 60, now, 2).unwrap();

        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get_at("a", now, 3).is_some());

        cache.set_at("c", sized_response(400_000), 60, now, 4).unwrap();
        assert!(cache.get_at("b", now, 5).is_none());
        assert!(cache.get_at("a", now, 6).is_some());
        assert!(cache.get_at("c", now, 7).is_some());

        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert!(stats.total_bytes <= 1024 * 1024);
    }

    #[test]
    fn test_eviction_loops_until_insert_fits() {
        let cache = ResponseCache::new(1000, 1);
        let now = unix_now();
        for i in 0..10 {
            let key = format!("small-{i}");
            cache
                .set_at(&key, sized_response(100_000), 60, now, i)
                .unwrap();
        }
        assert_eq!(cache.stats().entries, 10);

        // A single insert close to the byte bound displaces many entries.
        cache
            .set_at("big", sized_response(1_000_000), 60, now, 100)
            .unwrap();
        let stats = cache.stats();
        assert!(stats.total_bytes <= 1024 * 1024);
        assert!(cache.get_at("big", now, 101).is_some());
    }

    #[test]
    fn test_capacity_bound_evicts_oldest() {
        let cache = ResponseCache::new(2, 100);
        let now = unix_now();
        cache.set_at("a", response(b"1"), 60, now, 1).unwrap();
        cache.set_at("b", response(b"2"), 60, now, 2).unwrap();
        cache.set_at("c", response(b"3"), 60, now, 3).unwrap();

        assert_eq!(cache.stats().entries, 2);
        assert!(cache.get_at("a", now, 4).is_none());
        assert!(cache.get_at("c", now, 5).is_some());
    }

    #[test]
    fn test_oversized_insert_is_refused() {
        let cache = ResponseCache::new(10, 1);
        cache.set("small", sized_response(100), 60).unwrap();

        let err = cache.set("huge", sized_response(2_000_000), 60).unwrap_err();
        assert!(matches!(err, GatewayError::CacheTooLarge { .. }));

        // The refusal must not have disturbed existing entries.
        assert!(cache.get("small").is_some());
    }

    #[test]
    fn test_clear_empties_cache() {
        let cache = ResponseCache::new(10, 1);
        cache.set("a", response(b"1"), 60).unwrap();
        cache.set("b", response(b"2"), 60).unwrap();

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_bytes, 0);
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let a = cache_key("GET", "/api/users", "page=1", b"");
        let b = cache_key("GET", "/api/users", "page=1", b"");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_cache_key_differs_on_any_component() {
        let base = cache_key("GET", "/api/users", "page=1", b"");
        assert_ne!(base, cache_key("POST", "/api/users", "page=1", b""));
        assert_ne!(base, cache_key("GET", "/api/orders", "page=1", b""));
        assert_ne!(base, cache_key("GET", "/api/users", "page=2", b""));
        assert_ne!(base, cache_key("GET", "/api/users", "page=1", b"body"));
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(ResponseCache::new(100, 10));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for j in 0..100 {
                        let key = format!("key-{}", j % 10);
                        if i % 2 == 0 {
                            cache.set(&key, sized_response(100), 60).unwrap();
                        } else {
                            cache.get(&key);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.entries <= 10);
        assert!(stats.total_bytes <= stats.max_bytes);
    }
}
