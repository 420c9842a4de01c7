//! Bounded, version-stamped caches for graph traversal results.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Counters and size of a single cache, as reported by
/// [`graph_stats`](crate::graph_stats).
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Live entries at the time of the snapshot, including stale ones not yet
    /// swept.
    pub entries: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that missed, including version-stale and expired entries.
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups answered from the cache, or 0.0 when none were
    /// made.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry<V> {
    value: V,
    version: u64,
    last_access: Instant,
}

/// A capacity-bounded map whose entries are stamped with the graph's
/// structural version. Entries from older versions are treated as misses and
/// dropped lazily; a sweep runs whenever an insert finds the cache full.
pub(crate) struct VersionedCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    capacity: usize,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

impl<K: Eq + Hash + Copy, V: Clone> VersionedCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            ttl,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up `key` at the given structural version. A hit refreshes the
    /// entry's access time; a stale or expired entry is removed and counts as
    /// a miss.
    pub fn get(&mut self, key: &K, version: u64) -> Option<V> {
        match self.entries.get_mut(key) {
            Some(entry) if entry.version == version && entry.last_access.elapsed() <= self.ttl => {
                entry.last_access = Instant::now();
                self.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                self.entries.remove(key);
                self.misses += 1;
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store `value` stamped with `version`, evicting stale and
    /// least-recently-used entries when the cache is full.
    pub fn insert(&mut self, key: K, value: V, version: u64) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.sweep(version);
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        self.entries.insert(
            key,
            Entry {
                value,
                version,
                last_access: Instant::now(),
            },
        );
    }

    /// Remove entries whose version is stale or whose TTL has elapsed.
    pub fn sweep(&mut self, version: u64) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, e| e.version == version && e.last_access.elapsed() <= ttl);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }

    fn evict_oldest(&mut self) {
        if let Some(key) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| *k)
        {
            self.entries.remove(&key);
        }
    }
}
