//! Bounded local fallback cache.
//!
//! Strict least-recently-used eviction where reads and writes both count as
//! an access, plus per-entry expiry. Not synchronized on its own; the session
//! store keeps it behind a mutex.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

struct CacheEntry {
    payload: String,
    expires_at: Instant,
    /// Recency stamp; also the key of this entry in `LocalCache::recency`.
    stamp: u64,
}

/// Point-in-time view of cache occupancy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub utilization_pct: f64,
    pub ttl_secs: u64,
}

/// LRU + TTL cache of raw session payloads.
pub struct LocalCache {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<String, CacheEntry>,
    recency: BTreeMap<u64, String>,
    next_stamp: u64,
}

impl LocalCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_stamp: 0,
        }
    }

    /// Default TTL applied by [`LocalCache::insert`].
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up `key`, refreshing its recency.
    ///
    /// Entries past their expiry are removed and reported as absent.
    pub fn get(&mut self, key: &str) -> Option<String> {
        let now = Instant::now();
        let expired = self.entries.get(key)?.expires_at <= now;
        if expired {
            self.remove(key);
            return None;
        }

        let stamp = self.bump();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.stamp);
        entry.stamp = stamp;
        self.recency.insert(stamp, key.to_string());
        Some(entry.payload.clone())
    }

    /// Insert with the cache's default TTL. Returns the number of entries
    /// evicted to stay within capacity.
    pub fn insert(&mut self, key: &str, payload: String) -> usize {
        self.insert_with_ttl(key, payload, self.ttl)
    }

    /// Insert or replace `key`, counting as an access.
    pub fn insert_with_ttl(&mut self, key: &str, payload: String, ttl: Duration) -> usize {
        let stamp = self.bump();
        let entry = CacheEntry {
            payload,
            expires_at: Instant::now() + ttl,
            stamp,
        };
        if let Some(previous) = self.entries.insert(key.to_string(), entry) {
            self.recency.remove(&previous.stamp);
        }
        self.recency.insert(stamp, key.to_string());
        self.evict_to_capacity()
    }

    /// Remove `key`. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.recency.remove(&entry.stamp);
                true
            }
            None => false,
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    pub fn stats(&self) -> CacheStats {
        let utilization_pct = if self.capacity == 0 {
            100.0
        } else {
            self.entries.len() as f64 / self.capacity as f64 * 100.0
        };
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            utilization_pct,
            ttl_secs: self.ttl.as_secs(),
        }
    }

    fn bump(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }

    fn evict_to_capacity(&mut self) -> usize {
        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            let Some((_, key)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&key);
            debug!(key = %key, "Evicted least recently used cache entry");
            evicted += 1;
        }
        evicted
    }
}
