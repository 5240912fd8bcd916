//! In-memory doubles for the store and upstream collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::RwLock;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{
    BatchConfig, CacheCoordinator, CacheEntry, ResponsePayload, VolatileCache, WriteBatcher,
};
use crate::error::{FetchError, StoreError};
use crate::storage::{EntryStore, StoreSummary};
use crate::upstream::{Upstream, UpstreamRequest};

fn unavailable() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

// == Memory Store ==
#[derive(Default)]
pub struct MemoryStore {
    pub entries: Mutex<HashMap<String, CacheEntry>>,
    pub corrupt_keys: Mutex<HashSet<String>>,
    pub purged: Mutex<Vec<String>>,
    /// Number of upcoming commits that fail
    pub failing_commits: AtomicU32,
    pub commit_attempts: AtomicUsize,
    pub commit_delay: Mutex<Option<Duration>>,
    pub unreachable: AtomicBool,
}

impl MemoryStore {
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn insert(&self, entry: CacheEntry) {
        self.entries.lock().insert(entry.key().to_string(), entry);
    }

    pub fn fail_next_commits(&self, count: u32) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        if self.corrupt_keys.lock().contains(key) {
            return Err(StoreError::Corrupt {
                key: key.to_string(),
                reason: "bad header list".to_string(),
            });
        }
        Ok(self.entries.lock().get(key).filter(|e| e.is_fresh()).cloned())
    }

    async fn commit(&self, batch: &HashMap<String, CacheEntry>) -> Result<(), StoreError> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.commit_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self.failing_commits.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_commits.store(failing - 1, Ordering::SeqCst);
            return Err(unavailable());
        }

        let mut entries = self.entries.lock();
        for (key, entry) in batch {
            entries.insert(key.clone(), entry.clone());
        }
        Ok(())
    }

    async fn purge(&self, key: &str) -> Result<bool, StoreError> {
        self.purged.lock().push(key.to_string());
        if !self.corrupt_keys.lock().remove(key) {
            return Ok(false);
        }
        self.entries.lock().remove(key);
        Ok(true)
    }

    async fn sweep_expired(&self, now_ms: u64) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired_at(now_ms));
        Ok((before - entries.len()) as u64)
    }

    async fn summary(&self) -> Result<StoreSummary, StoreError> {
        let entries = self.entries.lock();
        Ok(StoreSummary {
            entries: entries.len() as u64,
            total_bytes: entries.values().map(|e| e.payload().body.len() as u64).sum(),
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }
}

// == Stub Upstream ==
#[derive(Default)]
pub struct StubUpstream {
    pub responses: Mutex<HashMap<String, Result<ResponsePayload, FetchError>>>,
    pub calls: AtomicUsize,
    pub delay: Mutex<Option<Duration>>,
}

impl StubUpstream {
    pub fn respond(&self, url: &str, response: Result<ResponsePayload, FetchError>) {
        self.responses.lock().insert(url.to_string(), response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for StubUpstream {
    async fn fetch(&self, request: &UpstreamRequest) -> Result<ResponsePayload, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.responses
            .lock()
            .get(request.url.as_str())
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Unreachable(request.url.to_string())))
    }
}

pub fn ok_payload(body: &'static str) -> ResponsePayload {
    ResponsePayload::new(
        200,
        vec![("content-type".to_string(), "text/plain".to_string())],
        body,
    )
}

pub fn fresh_entry(key: &str, body: &'static str) -> CacheEntry {
    CacheEntry::new(key, ok_payload(body), Duration::from_secs(300))
}

pub fn stale_entry(key: &str, body: &'static str) -> CacheEntry {
    let now = current_timestamp_ms();
    CacheEntry::from_parts(key, ok_payload(body), now - 10_000, now - 1)
}

/// Coordinator wired to the given doubles with a five minute TTL.
pub fn coordinator(
    store: &Arc<MemoryStore>,
    upstream: &Arc<StubUpstream>,
    capacity: usize,
) -> CacheCoordinator {
    let batcher = Arc::new(WriteBatcher::new(store.clone(), BatchConfig::default()));
    CacheCoordinator::new(
        Arc::new(RwLock::new(VolatileCache::new(capacity))),
        store.clone(),
        batcher,
        upstream.clone(),
        Duration::from_secs(300),
    )
}
