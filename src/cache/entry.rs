//! Cache Entry Module
//!
//! Defines cached upstream responses and the freshness rule shared by both tiers.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;

// == Response Payload ==
/// Status, headers and body of an upstream response.
///
/// Once wrapped in a [`CacheEntry`] the payload is shared behind an `Arc`
/// and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePayload {
    /// HTTP status code
    pub status: u16,
    /// Response headers in upstream order
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Bytes,
}

impl ResponsePayload {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Returns the first header value matching `name` (case-insensitive).
    #[cfg(test)]
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// == Cache Entry ==
/// A cached response together with its key and expiry metadata.
///
/// Entries are immutable: replacing a cached response means building a new
/// entry under the same key.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    key: String,
    payload: Arc<ResponsePayload>,
    /// Creation timestamp (Unix milliseconds)
    created_at: u64,
    /// Expiration timestamp (Unix milliseconds)
    expires_at: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry stamped with the current time that stays fresh for `ttl`.
    pub fn new(key: impl Into<String>, payload: ResponsePayload, ttl: Duration) -> Self {
        let now = current_timestamp_ms();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

        Self {
            key: key.into(),
            payload: Arc::new(payload),
            created_at: now,
            expires_at: now.saturating_add(ttl_ms),
        }
    }

    /// Rebuilds an entry from stored metadata.
    pub fn from_parts(
        key: impl Into<String>,
        payload: ResponsePayload,
        created_at: u64,
        expires_at: u64,
    ) -> Self {
        Self {
            key: key.into(),
            payload: Arc::new(payload),
            created_at,
            expires_at,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn payload(&self) -> &Arc<ResponsePayload> {
        &self.payload
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    // == Freshness ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time is greater than or equal to
    /// its expiration time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    /// Same as [`is_expired`](Self::is_expired) against an explicit clock reading.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    pub fn is_fresh(&self) -> bool {
        !self.is_expired()
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds (0 once expired).
    pub fn ttl_remaining_ms(&self) -> u64 {
        self.expires_at.saturating_sub(current_timestamp_ms())
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}
