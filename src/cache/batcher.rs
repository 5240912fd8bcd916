//! Write Batcher Module
//!
//! Write-behind queue in front of the persistent store. Writes are coalesced
//! per key and committed in one transaction once the batch is large enough or
//! its oldest entry has waited long enough.
//!
//! The batch is double-buffered: a flush swaps the current batch for an empty
//! one before any I/O starts, so `enqueue` never waits on a commit.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::cache::{BatchStats, CacheEntry};
use crate::error::{PersistenceError, StoreError};
use crate::storage::EntryStore;

// == Batch Config ==
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Flush once this many distinct keys are queued
    pub max_size: usize,
    /// Flush once the oldest queued entry has waited this long
    pub max_delay: Duration,
    /// Commit retries after the first failed attempt
    pub max_retries: u32,
    /// Backoff before the first retry, doubled on each further retry
    pub retry_backoff: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            max_delay: Duration::from_secs(1),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Default)]
struct PendingBatch {
    entries: HashMap<String, CacheEntry>,
    /// When the oldest entry of this batch was queued
    oldest: Option<Instant>,
}

impl PendingBatch {
    fn insert(&mut self, entry: CacheEntry) {
        if self.oldest.is_none() {
            self.oldest = Some(Instant::now());
        }
        self.entries.insert(entry.key().to_string(), entry);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// == Write Batcher ==
pub struct WriteBatcher {
    store: Arc<dyn EntryStore>,
    config: BatchConfig,
    current: Mutex<PendingBatch>,
    /// Batch being committed right now, still readable by lookups
    in_flight: Mutex<Option<Arc<HashMap<String, CacheEntry>>>>,
    /// One commit at a time
    flush_lock: AsyncMutex<()>,
    wakeup: Notify,
    stats: Mutex<BatchStats>,
}

impl WriteBatcher {
    pub fn new(store: Arc<dyn EntryStore>, config: BatchConfig) -> Self {
        Self {
            store,
            config,
            current: Mutex::new(PendingBatch::default()),
            in_flight: Mutex::new(None),
            flush_lock: AsyncMutex::new(()),
            wakeup: Notify::new(),
            stats: Mutex::new(BatchStats::default()),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    // == Enqueue ==
    /// Queues a durable write, replacing any pending write for the same key.
    ///
    /// Wakes the flush task when a new batch starts or the size threshold is hit.
    pub fn enqueue(&self, entry: CacheEntry) {
        let (len, started) = {
            let mut current = self.current.lock();
            let started = current.is_empty();
            current.insert(entry);
            (current.len(), started)
        };

        if started || len >= self.config.max_size {
            self.wakeup.notify_one();
        }
    }

    // == Pending Lookup ==
    /// Returns the queued or in-flight write for `key`, newest first.
    pub fn pending(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.current.lock().entries.get(key) {
            return Some(entry.clone());
        }
        self.in_flight
            .lock()
            .as_ref()
            .and_then(|batch| batch.get(key).cloned())
    }

    pub fn pending_len(&self) -> usize {
        self.current.lock().len()
    }

    // == Triggers ==
    /// True when the current batch has reached the size or age threshold.
    pub fn flush_due(&self) -> bool {
        let current = self.current.lock();
        if current.is_empty() {
            return false;
        }
        current.len() >= self.config.max_size
            || current
                .oldest
                .is_some_and(|queued| queued.elapsed() >= self.config.max_delay)
    }

    /// Instant at which the current batch becomes due by age.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.current
            .lock()
            .oldest
            .map(|queued| queued + self.config.max_delay)
    }

    /// Resolves when a new batch starts or the size threshold is reached.
    pub async fn notified(&self) {
        self.wakeup.notified().await;
    }

    // == Flush ==
    /// Commits the current batch as one transaction.
    ///
    /// Returns the number of entries written. When every retry fails the
    /// entries go back into the current batch, where writes queued in the
    /// meantime take precedence.
    pub async fn flush(&self) -> Result<usize, PersistenceError> {
        let _guard = self.flush_lock.lock().await;

        // `in_flight` is set before `current` is unlocked.
        let (entries, oldest) = {
            let mut current = self.current.lock();
            let PendingBatch { entries, oldest } = mem::take(&mut *current);
            if entries.is_empty() {
                return Ok(0);
            }
            let entries = Arc::new(entries);
            *self.in_flight.lock() = Some(Arc::clone(&entries));
            (entries, oldest)
        };
        let count = entries.len();

        match self.commit_with_retry(&entries).await {
            Ok(()) => {
                *self.in_flight.lock() = None;
                let mut stats = self.stats.lock();
                stats.flushed_batches += 1;
                stats.flushed_entries += count as u64;
                debug!(entries = count, "flushed write batch");
                Ok(count)
            }
            Err((attempts, source)) => {
                self.requeue((*entries).clone(), oldest);
                *self.in_flight.lock() = None;
                self.stats.lock().failed_flushes += 1;
                error!(
                    entries = count,
                    attempts,
                    error = %source,
                    "write batch commit failed, keeping entries pending"
                );
                Err(PersistenceError {
                    attempts,
                    pending: count,
                    source,
                })
            }
        }
    }

    pub fn stats(&self) -> BatchStats {
        let mut stats = self.stats.lock().clone();
        stats.pending_entries = self.pending_len();
        stats
    }

    async fn commit_with_retry(
        &self,
        batch: &HashMap<String, CacheEntry>,
    ) -> Result<(), (u32, StoreError)> {
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 1;

        loop {
            match self.store.commit(batch).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < max_attempts => {
                    warn!(attempt, error = %err, "batch commit failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => return Err((attempt, err)),
            }
        }
    }

    fn requeue(&self, failed: HashMap<String, CacheEntry>, oldest: Option<Instant>) {
        let mut current = self.current.lock();
        for (key, entry) in failed {
            current.entries.entry(key).or_insert(entry);
        }
        current.oldest = match (current.oldest, oldest) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_support::{fresh_entry, MemoryStore};
    use crate::cache::ResponsePayload;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn batcher_with(store: &Arc<MemoryStore>, config: BatchConfig) -> Arc<WriteBatcher> {
        let store: Arc<dyn EntryStore> = store.clone();
        Arc::new(WriteBatcher::new(store, config))
    }

    fn quick_retries() -> BatchConfig {
        BatchConfig {
            max_retries: 2,
            retry_backoff: Duration::from_millis(1),
            ..BatchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_enqueue_keeps_latest_value_per_key() {
        let store = Arc::new(MemoryStore::default());
        let batcher = batcher_with(&store, BatchConfig::default());

        batcher.enqueue(fresh_entry("k", "v1"));
        batcher.enqueue(fresh_entry("k", "v2"));
        batcher.enqueue(fresh_entry("j", "v3"));

        assert_eq!(batcher.pending_len(), 2);
        assert_eq!(batcher.pending("k").unwrap().payload().body.as_ref(), b"v2");
        assert!(!store.contains("k"));
    }

    #[tokio::test]
    async fn test_flush_commits_and_clears_batch() {
        let store = Arc::new(MemoryStore::default());
        let batcher = batcher_with(&store, BatchConfig::default());

        batcher.enqueue(fresh_entry("a", "1"));
        batcher.enqueue(fresh_entry("b", "2"));

        assert_eq!(batcher.flush().await.unwrap(), 2);
        assert!(store.contains("a"));
        assert!(store.contains("b"));
        assert_eq!(batcher.pending_len(), 0);
        assert!(batcher.pending("a").is_none());

        let stats = batcher.stats();
        assert_eq!(stats.flushed_batches, 1);
        assert_eq!(stats.flushed_entries, 2);
    }

    #[tokio::test]
    async fn test_flush_empty_batch_skips_commit() {
        let store = Arc::new(MemoryStore::default());
        let batcher = batcher_with(&store, BatchConfig::default());

        assert_eq!(batcher.flush().await.unwrap(), 0);
        assert_eq!(store.commit_attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let store = Arc::new(MemoryStore::default());
        store.fail_next_commits(1);
        let batcher = batcher_with(&store, quick_retries());

        batcher.enqueue(fresh_entry("a", "1"));

        assert_eq!(batcher.flush().await.unwrap(), 1);
        assert_eq!(store.commit_attempts.load(Ordering::SeqCst), 2);
        assert!(store.contains("a"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_keep_batch_pending() {
        let store = Arc::new(MemoryStore::default());
        store.fail_next_commits(10);
        let batcher = batcher_with(&store, quick_retries());

        batcher.enqueue(fresh_entry("a", "1"));
        batcher.enqueue(fresh_entry("b", "2"));

        let err = batcher.flush().await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.pending, 2);
        assert_eq!(store.commit_attempts.load(Ordering::SeqCst), 3);

        assert_eq!(batcher.pending_len(), 2);
        assert!(batcher.flush_due() || batcher.next_deadline().is_some());
        assert_eq!(batcher.stats().failed_flushes, 1);

        store.fail_next_commits(0);
        assert_eq!(batcher.flush().await.unwrap(), 2);
        assert!(store.contains("a"));
    }

    #[tokio::test]
    async fn test_requeue_prefers_writes_queued_during_flush() {
        let store = Arc::new(MemoryStore::default());
        store.fail_next_commits(10);
        *store.commit_delay.lock() = Some(Duration::from_millis(50));
        let batcher = batcher_with(
            &store,
            BatchConfig {
                max_retries: 0,
                ..BatchConfig::default()
            },
        );

        batcher.enqueue(fresh_entry("k", "old"));
        let flushing = tokio::spawn({
            let batcher = Arc::clone(&batcher);
            async move { batcher.flush().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        batcher.enqueue(fresh_entry("k", "new"));

        assert!(flushing.await.unwrap().is_err());
        assert_eq!(batcher.pending_len(), 1);
        assert_eq!(batcher.pending("k").unwrap().payload().body.as_ref(), b"new");
    }

    #[tokio::test]
    async fn test_in_flight_batch_stays_visible_and_enqueue_does_not_block() {
        let store = Arc::new(MemoryStore::default());
        *store.commit_delay.lock() = Some(Duration::from_millis(100));
        let batcher = batcher_with(&store, BatchConfig::default());

        batcher.enqueue(fresh_entry("a", "1"));
        let flushing = tokio::spawn({
            let batcher = Arc::clone(&batcher);
            async move { batcher.flush().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // the commit is still sleeping inside the store
        assert!(batcher.pending("a").is_some());
        assert!(!store.contains("a"));

        batcher.enqueue(fresh_entry("b", "2"));
        assert_eq!(batcher.pending_len(), 1);

        assert_eq!(flushing.await.unwrap().unwrap(), 1);
        assert!(store.contains("a"));
        assert!(!store.contains("b"));
        assert!(batcher.pending("b").is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_readers_never_observe_an_older_version_during_flush() {
        fn version(n: u64) -> CacheEntry {
            CacheEntry::new(
                "k",
                ResponsePayload::new(200, Vec::new(), n.to_string()),
                Duration::from_secs(300),
            )
        }

        let store = Arc::new(MemoryStore::default());
        store.insert(version(0));
        let batcher = batcher_with(&store, BatchConfig::default());
        let done = Arc::new(AtomicBool::new(false));

        let reader = std::thread::spawn({
            let store = Arc::clone(&store);
            let batcher = Arc::clone(&batcher);
            let done = Arc::clone(&done);
            move || {
                let mut newest_seen = 0u64;
                while !done.load(Ordering::SeqCst) {
                    let seen = batcher
                        .pending("k")
                        .or_else(|| store.entries.lock().get("k").cloned())
                        .map(|entry| {
                            std::str::from_utf8(&entry.payload().body)
                                .ok()
                                .and_then(|text| text.parse::<u64>().ok())
                                .unwrap_or(0)
                        })
                        .unwrap_or(0);
                    assert!(seen >= newest_seen, "read {} after {}", seen, newest_seen);
                    newest_seen = seen;
                }
            }
        });

        for n in 1..=2_000 {
            batcher.enqueue(version(n));
            batcher.flush().await.unwrap();
        }
        done.store(true, Ordering::SeqCst);

        reader.join().unwrap();
    }

    #[tokio::test]
    async fn test_flush_due_by_size() {
        let store = Arc::new(MemoryStore::default());
        let batcher = batcher_with(
            &store,
            BatchConfig {
                max_size: 2,
                max_delay: Duration::from_secs(60),
                ..BatchConfig::default()
            },
        );

        assert!(!batcher.flush_due());
        batcher.enqueue(fresh_entry("a", "1"));
        assert!(!batcher.flush_due());
        batcher.enqueue(fresh_entry("b", "2"));
        assert!(batcher.flush_due());
    }

    #[tokio::test]
    async fn test_flush_due_by_age() {
        let store = Arc::new(MemoryStore::default());
        let batcher = batcher_with(
            &store,
            BatchConfig {
                max_size: 100,
                max_delay: Duration::from_millis(50),
                ..BatchConfig::default()
            },
        );

        assert!(batcher.next_deadline().is_none());
        batcher.enqueue(fresh_entry("a", "1"));
        assert!(batcher.next_deadline().is_some());
        assert!(!batcher.flush_due());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(batcher.flush_due());
    }
}
