//! Cache Coordinator Module
//!
//! Resolves a request through the memory tier, the persistent tier and
//! finally the upstream origin, populating both tiers on a cacheable miss.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::stats::ResolveCounters;
use crate::cache::{
    BatchStats, CacheEntry, CacheKey, CacheStats, ResolveStats, ResponsePayload, VolatileCache,
    WriteBatcher,
};
use crate::error::{FetchError, StoreError};
use crate::storage::{EntryStore, StoreSummary};
use crate::upstream::{Upstream, UpstreamRequest};

// == Resolution ==
/// Tier that answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Memory,
    Persistent,
    Upstream,
}

impl CacheSource {
    /// Value of the `X-Cache` response header.
    pub fn header_value(&self) -> &'static str {
        match self {
            CacheSource::Memory => "HIT-MEMORY",
            CacheSource::Persistent => "HIT-DISK",
            CacheSource::Upstream => "MISS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub payload: Arc<ResponsePayload>,
    pub source: CacheSource,
}

/// Only complete `200 OK` responses are stored.
pub fn is_cacheable(payload: &ResponsePayload) -> bool {
    payload.status == 200
}

// == Cache Coordinator ==
pub struct CacheCoordinator {
    memory: Arc<RwLock<VolatileCache>>,
    store: Arc<dyn EntryStore>,
    batcher: Arc<WriteBatcher>,
    upstream: Arc<dyn Upstream>,
    ttl: Duration,
    counters: ResolveCounters,
}

impl CacheCoordinator {
    pub fn new(
        memory: Arc<RwLock<VolatileCache>>,
        store: Arc<dyn EntryStore>,
        batcher: Arc<WriteBatcher>,
        upstream: Arc<dyn Upstream>,
        ttl: Duration,
    ) -> Self {
        Self {
            memory,
            store,
            batcher,
            upstream,
            ttl,
            counters: ResolveCounters::default(),
        }
    }

    pub fn memory(&self) -> &Arc<RwLock<VolatileCache>> {
        &self.memory
    }

    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    pub fn batcher(&self) -> &Arc<WriteBatcher> {
        &self.batcher
    }

    // == Resolve ==
    /// Answers `request` from the fastest tier holding a fresh entry for `key`.
    ///
    /// Cache-tier failures degrade to a miss. Only an upstream failure on a
    /// full miss is returned as an error, and nothing is cached for it.
    ///
    /// # Arguments
    /// * `key` - Canonical key derived from `request`
    /// * `request` - Request forwarded upstream on a miss
    pub async fn resolve(
        &self,
        key: &CacheKey,
        request: &UpstreamRequest,
    ) -> Result<Resolution, FetchError> {
        let memory_hit = self.memory.write().await.get(key.as_str());
        if let Some(entry) = memory_hit {
            ResolveCounters::bump(&self.counters.memory_hits);
            debug!(key = %key, ttl_ms = entry.ttl_remaining_ms(), "memory hit");
            return Ok(Resolution {
                payload: Arc::clone(entry.payload()),
                source: CacheSource::Memory,
            });
        }

        if let Some(entry) = self.lookup_persistent(key.as_str()).await {
            ResolveCounters::bump(&self.counters.persistent_hits);
            debug!(key = %key, "persistent hit, promoting");
            let payload = Arc::clone(entry.payload());
            self.memory.write().await.promote(entry);
            return Ok(Resolution {
                payload,
                source: CacheSource::Persistent,
            });
        }

        ResolveCounters::bump(&self.counters.upstream_fetches);
        let payload = match self.upstream.fetch(request).await {
            Ok(payload) => payload,
            Err(err) => {
                ResolveCounters::bump(&self.counters.fetch_errors);
                warn!(key = %key, error = %err, "upstream fetch failed");
                return Err(err);
            }
        };

        if !is_cacheable(&payload) {
            debug!(key = %key, status = payload.status, "response not cacheable");
            return Ok(Resolution {
                payload: Arc::new(payload),
                source: CacheSource::Upstream,
            });
        }

        let entry = CacheEntry::new(key.as_str(), payload, self.ttl);
        let payload = Arc::clone(entry.payload());
        self.memory.write().await.put(entry.clone());
        self.batcher.enqueue(entry);
        debug!(key = %key, "cached upstream response");

        Ok(Resolution {
            payload,
            source: CacheSource::Upstream,
        })
    }

    /// Write-behind buffer first, then the store.
    async fn lookup_persistent(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.batcher.pending(key).filter(CacheEntry::is_fresh) {
            return Some(entry);
        }

        match self.store.get(key).await {
            Ok(found) => found,
            Err(StoreError::Corrupt { reason, .. }) => {
                ResolveCounters::bump(&self.counters.corrupt_entries);
                warn!(key, reason = %reason, "discarding corrupt persistent entry");
                if let Err(err) = self.store.purge(key).await {
                    warn!(key, error = %err, "failed to purge corrupt entry");
                }
                None
            }
            Err(err) => {
                warn!(key, error = %err, "persistent lookup failed, treating as miss");
                None
            }
        }
    }

    // == Stats ==
    pub fn resolve_stats(&self) -> ResolveStats {
        self.counters.snapshot()
    }

    pub async fn memory_stats(&self) -> CacheStats {
        self.memory.read().await.stats()
    }

    pub fn batch_stats(&self) -> BatchStats {
        self.batcher.stats()
    }

    pub async fn store_summary(&self) -> Result<StoreSummary, StoreError> {
        self.store.summary().await
    }
}
