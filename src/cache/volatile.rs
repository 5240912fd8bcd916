//! Volatile Cache Module
//!
//! In-memory tier: HashMap storage with LRU tracking and per-entry TTL.
//! Never the source of truth; everything it holds is also queued for, or
//! already in, the persistent tier.

use std::collections::HashMap;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{CacheEntry, CacheStats, LruTracker};

// == Volatile Cache ==
/// Bounded memory cache with LRU eviction and TTL expiry.
///
/// All operations take `&mut self`; callers share it behind a lock.
#[derive(Debug)]
pub struct VolatileCache {
    entries: HashMap<String, CacheEntry>,
    lru: LruTracker,
    stats: CacheStats,
    /// Maximum number of entries; 0 disables the tier
    capacity: usize,
}

impl VolatileCache {
    // == Constructor ==
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.min(4096)),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            capacity,
        }
    }

    // == Get ==
    /// Returns the entry if present and fresh.
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get(&mut self, key: &str) -> Option<CacheEntry> {
        let now = current_timestamp_ms();
        let expired = self.entries.get(key).map(|entry| entry.is_expired_at(now));

        match expired {
            Some(false) => {
                self.stats.record_hit();
                self.lru.touch(key);
                self.entries.get(key).cloned()
            }
            Some(true) => {
                self.remove_entry(key);
                self.stats.record_expirations(1);
                self.stats.record_miss();
                None
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    // == Put ==
    /// Inserts or replaces the entry under its key and marks it most recently used.
    ///
    /// When the cache is full, expired entries are dropped first, then the
    /// least recently used one.
    pub fn put(&mut self, entry: CacheEntry) {
        if self.capacity == 0 {
            return;
        }

        let key = entry.key().to_string();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.cleanup_expired();
            while self.entries.len() >= self.capacity {
                if !self.drop_oldest() {
                    break;
                }
            }
        }

        self.lru.touch(&key);
        self.entries.insert(key, entry);
        self.stats.set_total_entries(self.entries.len());
    }

    // == Promote ==
    /// Inserts an entry read back from the persistent tier.
    ///
    /// A resident fresh entry created at the same time or later is kept, so a
    /// promotion racing with a newer fetch never rolls the key back. Returns
    /// whether the entry was inserted.
    pub fn promote(&mut self, entry: CacheEntry) -> bool {
        if let Some(existing) = self.entries.get(entry.key()) {
            if !existing.is_expired() && existing.created_at() >= entry.created_at() {
                self.lru.touch(entry.key());
                return false;
            }
        }

        self.put(entry);
        self.capacity > 0
    }

    // == Evict ==
    /// Removes an entry. Returns whether it was present.
    pub fn evict(&mut self, key: &str) -> bool {
        self.remove_entry(key)
    }

    // == Cleanup Expired ==
    /// Removes all expired entries, returning how many were dropped.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = current_timestamp_ms();
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.remove_entry(key);
        }

        self.stats.record_expirations(expired_keys.len());
        expired_keys.len()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops the least recently used entry. Returns false when nothing is tracked.
    fn drop_oldest(&mut self) -> bool {
        let Some(key) = self.lru.evict_oldest() else {
            return false;
        };

        if self.entries.remove(&key).is_some() {
            self.stats.record_eviction();
        }
        true
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        self.lru.remove(key);
        self.stats.set_total_entries(self.entries.len());
        removed
    }
}
