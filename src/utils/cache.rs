use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::debug;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    last_used: u64,
}

/// Bounded in-process memo cache with least-recently-used eviction and an
/// optional time-to-live.
///
/// A capacity of 0 disables caching entirely. Callers wrap it in a lock; the
/// cache itself is not synchronized.
pub struct MemoCache<K, V> {
    name: &'static str,
    capacity: usize,
    ttl: Option<Duration>,
    entries: HashMap<K, Entry<V>>,
    tick: u64,
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(name: &'static str, capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            name,
            capacity,
            ttl,
            entries: HashMap::with_capacity(capacity.min(1024)),
            tick: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a clone of the cached value. Expired entries are removed and reported as a miss.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let expired = match (self.entries.get(key), self.ttl) {
            (None, _) => {
                debug!(cache = self.name, ?key, "Cache miss");
                return None;
            }
            (Some(entry), Some(ttl)) => entry.inserted_at.elapsed() >= ttl,
            (Some(_), None) => false,
        };

        if expired {
            self.entries.remove(key);
            debug!(cache = self.name, ?key, "Cache expired");
            return None;
        }

        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(key)?;
        entry.last_used = tick;
        debug!(cache = self.name, ?key, "Cache hit");
        Some(entry.value.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_lru();
        }

        self.tick += 1;
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                last_used: self.tick,
            },
        );
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            debug!(cache = self.name, ?key, "Evicting least recently used entry");
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_exceeds_capacity() {
        let mut cache = MemoCache::new("test", 3, None);
        for i in 0..10 {
            cache.insert(i, i * 10);
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), cache.capacity());
        assert_eq!(cache.get(&9), Some(90));
        assert_eq!(cache.get(&0), None);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = MemoCache::new("test", 2, None);
        cache.insert("a", 1);
        cache.insert("b", 2);

        // touching "a" makes "b" the eviction candidate
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn test_reinsert_does_not_evict() {
        let mut cache = MemoCache::new("test", 2, None);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 5);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(5));
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let mut cache = MemoCache::new("test", 0, None);
        cache.insert("a", 1);
        assert!(cache.is_empty());
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn test_ttl_expiry() {
        let mut expired = MemoCache::new("test", 4, Some(Duration::ZERO));
        expired.insert("a", 1);
        assert_eq!(expired.get(&"a"), None);
        assert!(expired.is_empty());

        let mut fresh = MemoCache::new("test", 4, Some(Duration::from_secs(3600)));
        fresh.insert("a", 1);
        assert_eq!(fresh.get(&"a"), Some(1));
    }
}
