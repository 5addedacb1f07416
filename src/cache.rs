//! Generic keyed-byte cache with TTL and atomic counters.
//!
//! Serves the embedding cache, query-result cache, and any token-revocation
//! set built on top of it. A single generic store rather than three
//! near-duplicate implementations, generalizing the teacher pack's
//! `EmbeddingCache` (entries scoped to `Vec<f32>`) to an arbitrary
//! serializable value.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

/// A keyed cache with per-entry TTL and atomic hit/miss/eviction counters.
///
/// Deletion is idempotent: removing an absent key is a no-op, not an error.
pub struct Cache<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    stats: CacheStats,
    max_entries: usize,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            stats: CacheStats::default(),
            max_entries,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(entry) if entry.expires_at.is_none_or(|exp| Instant::now() < exp) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        let mut entries = self.entries.write();

        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            // Simple eviction: drop the entry with the earliest expiry (or
            // an arbitrary entry among those with no TTL).
            if let Some(victim) = entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at.unwrap_or(Instant::now() + Duration::from_secs(u64::MAX / 2)))
                .map(|(k, _)| k.clone())
            {
                entries.remove(&victim);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        entries.insert(
            key,
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
    }

    /// Removes a key. Idempotent: removing an absent key is a no-op.
    pub fn remove(&self, key: &K) {
        self.entries.write().remove(key);
    }

    /// Removes every entry for which `predicate` returns true. Used for the
    /// query-result cache's per-user invalidation on document completion.
    pub fn retain(&self, mut predicate: impl FnMut(&K) -> bool) {
        self.entries.write().retain(|k, _| predicate(k));
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn set_then_get_within_ttl_returns_value() {
        let cache: Cache<String, Vec<f32>> = Cache::new(10);
        cache.set("k".to_string(), vec![1.0, 2.0], Some(Duration::from_secs(60)));
        assert_eq!(cache.get(&"k".to_string()), Some(vec![1.0, 2.0]));
        assert_eq!(cache.stats().hits(), 1);
    }

    #[test]
    fn get_after_ttl_expiry_returns_miss() {
        let cache: Cache<String, i32> = Cache::new(10);
        cache.set("k".to_string(), 42, Some(Duration::from_millis(10)));
        sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&"k".to_string()), None);
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let cache: Cache<String, i32> = Cache::new(10);
        cache.remove(&"missing".to_string());
        cache.set("k".to_string(), 1, None);
        cache.remove(&"k".to_string());
        cache.remove(&"k".to_string());
        assert!(cache.is_empty());
    }

    #[test]
    fn retain_evicts_by_predicate() {
        let cache: Cache<String, i32> = Cache::new(10);
        cache.set("user1:q1".to_string(), 1, None);
        cache.set("user1:q2".to_string(), 2, None);
        cache.set("user2:q1".to_string(), 3, None);
        cache.retain(|k| !k.starts_with("user1:"));
        assert_eq!(cache.len(), 1);
    }
}
