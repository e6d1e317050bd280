//! Bounded TTL cache for alignment results.
//!
//! Not a correctness mechanism: a miss just means the query runs again.
//! A zero TTL disables the cache entirely.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

pub const DEFAULT_MAX_ENTRIES: usize = 64;

/// Least-recently-used entries go first when full; expiry is checked on read.
#[derive(Debug)]
pub struct TtlCache<K: Hash + Eq, V> {
    ttl: Duration,
    entries: LruCache<K, (Instant, V)>,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(ttl: Duration, max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: LruCache::new(cap),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&mut self, key: &K, now: Instant) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }
        let fresh = match self.entries.peek(key) {
            Some((at, _)) => now.saturating_duration_since(*at) < self.ttl,
            None => return None,
        };
        if !fresh {
            self.entries.pop(key);
            return None;
        }
        self.entries.get(key).map(|(_, v)| v.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn insert_at(&mut self, key: K, value: V, now: Instant) {
        if self.is_enabled() {
            self.entries.put(key, (now, value));
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_after_ttl() {
        let t0 = Instant::now();
        let mut c = TtlCache::new(Duration::from_secs(900));
        c.insert_at("k", 1, t0);
        assert_eq!(c.get_at(&"k", t0 + Duration::from_secs(899)), Some(1));
        assert_eq!(c.get_at(&"k", t0 + Duration::from_secs(900)), None);
        assert!(c.is_empty());
    }

    #[test]
    fn zero_ttl_disables() {
        let mut c = TtlCache::new(Duration::ZERO);
        c.insert("k", 1);
        assert!(!c.is_enabled());
        assert_eq!(c.get(&"k"), None);
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn evicts_least_recently_used_when_full() {
        let t0 = Instant::now();
        let mut c = TtlCache::with_capacity(Duration::from_secs(60), 2);
        c.insert_at("a", 1, t0);
        c.insert_at("b", 2, t0 + Duration::from_secs(1));
        // Reading "a" makes "b" the eviction candidate.
        assert_eq!(c.get_at(&"a", t0 + Duration::from_secs(2)), Some(1));
        c.insert_at("c", 3, t0 + Duration::from_secs(3));
        let now = t0 + Duration::from_secs(4);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get_at(&"b", now), None);
        assert_eq!(c.get_at(&"a", now), Some(1));
        assert_eq!(c.get_at(&"c", now), Some(3));
    }

    #[test]
    fn zero_capacity_keeps_one_entry() {
        let mut c = TtlCache::with_capacity(Duration::from_secs(60), 0);
        c.insert("a", 1);
        c.insert("b", 2);
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(&"b"), Some(2));
    }
}
