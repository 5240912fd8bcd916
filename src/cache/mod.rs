//! Cache Module
//!
//! Two-tier response cache: a bounded in-memory tier with LRU eviction and
//! TTL expiry, backed by a write-behind batch into the persistent store.

mod batcher;
mod coordinator;
pub mod entry;
mod key;
mod lru;
mod stats;
mod volatile;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export public types
pub use batcher::{BatchConfig, WriteBatcher};
pub use coordinator::{is_cacheable, CacheCoordinator, CacheSource, Resolution};
pub use entry::{CacheEntry, ResponsePayload};
pub use key::{normalize_url, relevant_headers, CacheKey, KeyError};
pub use lru::LruTracker;
pub use stats::{BatchStats, CacheStats, ResolveStats};
pub use volatile::VolatileCache;
