//! Cache Statistics Module
//!
//! Tracks hit/miss/eviction counters for the memory tier, request resolution
//! outcomes for the coordinator, and flush outcomes for the write batcher.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Memory-tier counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Lookups answered with a fresh entry
    pub hits: u64,
    /// Lookups that found nothing fresh
    pub misses: u64,
    /// Entries evicted to make room (LRU)
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed
    pub expirations: u64,
    /// Current number of entries
    pub total_entries: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }

    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}

// == Resolve Stats ==
/// Where requests resolved by the coordinator were answered from.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ResolveStats {
    pub memory_hits: u64,
    pub persistent_hits: u64,
    pub upstream_fetches: u64,
    pub fetch_errors: u64,
    pub corrupt_entries: u64,
}

/// Lock-free counters behind [`ResolveStats`], shared by concurrent requests.
#[derive(Debug, Default)]
pub(crate) struct ResolveCounters {
    pub memory_hits: AtomicU64,
    pub persistent_hits: AtomicU64,
    pub upstream_fetches: AtomicU64,
    pub fetch_errors: AtomicU64,
    pub corrupt_entries: AtomicU64,
}

impl ResolveCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ResolveStats {
        ResolveStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            persistent_hits: self.persistent_hits.load(Ordering::Relaxed),
            upstream_fetches: self.upstream_fetches.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            corrupt_entries: self.corrupt_entries.load(Ordering::Relaxed),
        }
    }
}

// == Batch Stats ==
/// Write-batcher counters.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BatchStats {
    /// Batches committed successfully
    pub flushed_batches: u64,
    /// Entries committed successfully
    pub flushed_entries: u64,
    /// Flushes that gave up after exhausting retries
    pub failed_flushes: u64,
    /// Entries currently waiting for a flush
    pub pending_entries: usize,
}
