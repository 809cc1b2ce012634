//! Bounded in-process cache backend.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;

use super::{CacheCounters, CacheStats, CachedResponse};

#[derive(Debug)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CachedResponse>>,
    max_size: usize,
    counters: CacheCounters,
}

impl MemoryCache {
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size: max_size.max(1),
            counters: CacheCounters::default(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedResponse>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            self.counters.miss();
            return None;
        };
        if entry.is_expired_at(Utc::now()) {
            entries.remove(key);
            self.counters.expired_lookup();
            return None;
        }
        entry.hit_count += 1;
        self.counters.hit();
        Some(entry.clone())
    }

    pub fn set(&self, key: &str, value: CachedResponse) {
        let mut entries = self.lock();
        if !entries.contains_key(key)
            && entries.len() >= self.max_size
            && let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(k, _)| k.clone())
        {
            entries.remove(&oldest);
            self.counters.eviction();
            tracing::debug!(fingerprint = %oldest, "Evicted oldest cache entry");
        }
        entries.insert(key.to_string(), value);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
        self.counters.reset();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let size = self.lock().len();
        self.counters.snapshot(size)
    }

    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired_at(now));
        let purged = before - entries.len();
        for _ in 0..purged {
            self.counters.expiration();
        }
        purged
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_descriptor;
    use chrono::Duration;

    fn entry(key: &str, age_secs: i64, ttl_secs: i64) -> CachedResponse {
        let mut value = CachedResponse::new(
            key,
            sample_descriptor("Ada Lovelace"),
            "openai",
            "gpt-4o-mini",
            Duration::seconds(ttl_secs),
        );
        value.created_at -= Duration::seconds(age_secs);
        value.expires_at -= Duration::seconds(age_secs);
        value
    }

    #[test]
    fn set_then_get_increments_hit_count_once() {
        let cache = MemoryCache::new(10);
        let value = entry("k", 0, 60);
        cache.set("k", value.clone());

        let got = cache.get("k").expect("entry");
        assert_eq!(got.hit_count, value.hit_count + 1);
        assert_eq!(got.descriptor, value.descriptor);
        assert_eq!(got.expires_at, value.expires_at);
    }

    #[test]
    fn expired_entry_is_a_miss_and_removed() {
        let cache = MemoryCache::new(10);
        cache.set("k", entry("k", 120, 60));

        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn entry_just_inside_ttl_is_returned() {
        let cache = MemoryCache::new(10);
        cache.set("k", entry("k", 55, 60));
        assert!(cache.get("k").is_some());
    }

    #[test]
    fn eviction_removes_only_oldest_created() {
        let cache = MemoryCache::new(3);
        cache.set("a", entry("a", 30, 600));
        cache.set("b", entry("b", 10, 600));
        cache.set("c", entry("c", 20, 600));
        // Touch "a" so access order differs from creation order.
        assert!(cache.get("a").is_some());

        cache.set("d", entry("d", 0, 600));

        assert_eq!(cache.len(), 3);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.get("d").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn replacing_existing_key_does_not_evict() {
        let cache = MemoryCache::new(2);
        cache.set("a", entry("a", 10, 600));
        cache.set("b", entry("b", 5, 600));
        cache.set("a", entry("a", 0, 600));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn purge_drops_only_expired() {
        let cache = MemoryCache::new(10);
        cache.set("old", entry("old", 120, 60));
        cache.set("new", entry("new", 0, 60));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clear_resets_everything() {
        let cache = MemoryCache::new(10);
        cache.set("k", entry("k", 0, 60));
        let _ = cache.get("k");
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        cache.set("k", entry("k", 0, 60));
        cache.clear();
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
