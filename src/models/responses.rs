//! Response DTOs for the admin endpoints
//!
//! Defines the structure of outgoing JSON bodies.

use serde::Serialize;

use crate::cache::{BatchStats, CacheStats, ResolveStats};
use crate::storage::StoreSummary;

/// Memory-tier figures as reported by `GET /_cache/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStatsResponse {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Current number of entries in memory
    pub total_entries: usize,
    pub capacity: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl MemoryStatsResponse {
    pub fn new(stats: &CacheStats, capacity: usize) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            expirations: stats.expirations,
            total_entries: stats.total_entries,
            capacity,
            hit_rate: stats.hit_rate(),
        }
    }
}

/// Response body for `GET /_cache/stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub memory: MemoryStatsResponse,
    pub requests: ResolveStats,
    pub batch: BatchStats,
    /// `None` when the store could not be queried
    pub store: Option<StoreSummary>,
}

/// Response body for `GET /_cache/health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthResponse {
    /// Creates a healthy response stamped with the current time
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            detail: None,
        }
    }

    /// Creates a degraded response carrying the failing check
    pub fn degraded(detail: impl Into<String>) -> Self {
        Self {
            status: "degraded".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            detail: Some(detail.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
