//! Persistent Storage Module
//!
//! Durable key → entry mapping behind the memory tier. Reads go straight to
//! the store; writes arrive only through write-batcher commits.

mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::cache::CacheEntry;
use crate::error::StoreError;

pub use sqlite::SqliteStore;

/// Row count and body volume of the persistent tier.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StoreSummary {
    pub entries: u64,
    pub total_bytes: u64,
}

// == Entry Store ==
/// Durable storage for cache entries.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Returns the stored entry if present and fresh.
    ///
    /// Rows that cannot be decoded yield [`StoreError::Corrupt`].
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Upserts every entry of the batch in one transaction.
    async fn commit(&self, batch: &HashMap<String, CacheEntry>) -> Result<(), StoreError>;

    /// Deletes the row for `key` if it still fails to decode.
    ///
    /// A row rewritten by a later commit is kept. Returns whether a row was
    /// removed.
    async fn purge(&self, key: &str) -> Result<bool, StoreError>;

    /// Deletes every row expired at `now_ms`.
    async fn sweep_expired(&self, now_ms: u64) -> Result<u64, StoreError>;

    async fn summary(&self) -> Result<StoreSummary, StoreError>;

    /// Cheap reachability probe used by the health endpoint.
    async fn health_check(&self) -> Result<(), StoreError>;
}
