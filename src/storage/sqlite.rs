//! SQLite-backed persistent tier.
//!
//! One row per key in a WAL-mode database, so readers keep going while a
//! batch commit holds the write lock.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use tracing::{debug, info, warn};

use super::{EntryStore, StoreSummary};
use crate::cache::entry::current_timestamp_ms;
use crate::cache::{CacheEntry, ResponsePayload};
use crate::error::StoreError;

const POOL_SIZE: u32 = 4;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS cache (
    key TEXT PRIMARY KEY NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    expected_size INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
)";

const CREATE_EXPIRY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_cache_expires_at ON cache (expires_at)";

const UPSERT: &str = "INSERT INTO cache \
    (key, status, headers, body, expected_size, created_at, expires_at) \
    VALUES (?, ?, ?, ?, ?, ?, ?) \
    ON CONFLICT(key) DO UPDATE SET \
    status = excluded.status, \
    headers = excluded.headers, \
    body = excluded.body, \
    expected_size = excluded.expected_size, \
    created_at = excluded.created_at, \
    expires_at = excluded.expires_at";

const SELECT_FRESH: &str = "SELECT status, headers, body, expected_size, created_at, expires_at \
    FROM cache WHERE key = ? AND expires_at > ?";

const SELECT_ANY: &str = "SELECT status, headers, body, expected_size, created_at, expires_at \
    FROM cache WHERE key = ?";

// == SQLite Store ==
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens the database at `path`, creating file and schema if absent.
    ///
    /// Fails if SQLite's integrity check reports damage. Rows whose body
    /// length no longer matches the recorded size are deleted.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(POOL_SIZE)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        store.verify_integrity().await?;

        info!(path = %path.display(), "persistent cache opened");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_EXPIRY_INDEX).execute(&self.pool).await?;
        Ok(())
    }

    // == Integrity ==
    /// Runs SQLite's integrity check and drops rows with truncated bodies.
    ///
    /// Returns the number of rows removed.
    pub async fn verify_integrity(&self) -> Result<u64, StoreError> {
        let status: String = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_one(&self.pool)
            .await?;
        if status != "ok" {
            return Err(StoreError::Integrity(status));
        }

        let removed = sqlx::query("DELETE FROM cache WHERE length(body) != expected_size")
            .execute(&self.pool)
            .await?
            .rows_affected();
        if removed > 0 {
            warn!(removed, "removed corrupt rows from persistent cache");
        }

        Ok(removed)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl EntryStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let row = sqlx::query(SELECT_FRESH)
            .bind(key)
            .bind(to_i64(current_timestamp_ms()))
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| decode_row(key, &row)).transpose()
    }

    async fn commit(&self, batch: &HashMap<String, CacheEntry>) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for entry in batch.values() {
            let payload = entry.payload();
            let headers =
                serde_json::to_string(&payload.headers).map_err(|err| StoreError::Encode {
                    key: entry.key().to_string(),
                    reason: err.to_string(),
                })?;
            let size = i64::try_from(payload.body.len()).map_err(|_| StoreError::Encode {
                key: entry.key().to_string(),
                reason: "body too large".to_string(),
            })?;

            sqlx::query(UPSERT)
                .bind(entry.key())
                .bind(i64::from(payload.status))
                .bind(headers)
                .bind(&payload.body[..])
                .bind(size)
                .bind(to_i64(entry.created_at()))
                .bind(to_i64(entry.expires_at()))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!(entries = batch.len(), "committed cache batch");
        Ok(())
    }

    async fn purge(&self, key: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(SELECT_ANY)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;

        // a batch may have replaced the row since it was read
        let still_corrupt = row.is_some_and(|row| decode_row(key, &row).is_err());
        if !still_corrupt {
            tx.rollback().await?;
            return Ok(false);
        }

        let removed = sqlx::query("DELETE FROM cache WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed > 0)
    }

    async fn sweep_expired(&self, now_ms: u64) -> Result<u64, StoreError> {
        let removed = sqlx::query("DELETE FROM cache WHERE expires_at <= ?")
            .bind(to_i64(now_ms))
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed)
    }

    async fn summary(&self) -> Result<StoreSummary, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS entries, COALESCE(SUM(length(body)), 0) AS total_bytes FROM cache",
        )
        .fetch_one(&self.pool)
        .await?;

        let entries: i64 = row.try_get("entries")?;
        let total_bytes: i64 = row.try_get("total_bytes")?;
        Ok(StoreSummary {
            entries: to_u64(entries),
            total_bytes: to_u64(total_bytes),
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// == Row Decoding ==
fn decode_row(key: &str, row: &SqliteRow) -> Result<CacheEntry, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        key: key.to_string(),
        reason,
    };

    let status: i64 = row.try_get("status").map_err(|e| corrupt(e.to_string()))?;
    let headers: String = row.try_get("headers").map_err(|e| corrupt(e.to_string()))?;
    let body: Vec<u8> = row.try_get("body").map_err(|e| corrupt(e.to_string()))?;
    let expected_size: i64 = row
        .try_get("expected_size")
        .map_err(|e| corrupt(e.to_string()))?;
    let created_at: i64 = row.try_get("created_at").map_err(|e| corrupt(e.to_string()))?;
    let expires_at: i64 = row.try_get("expires_at").map_err(|e| corrupt(e.to_string()))?;

    let status = u16::try_from(status)
        .ok()
        .filter(|code| (100..=999).contains(code))
        .ok_or_else(|| corrupt(format!("invalid status {status}")))?;
    let headers: Vec<(String, String)> =
        serde_json::from_str(&headers).map_err(|e| corrupt(format!("bad header list: {e}")))?;
    if i64::try_from(body.len()).ok() != Some(expected_size) {
        return Err(corrupt(format!(
            "body is {} bytes, expected {expected_size}",
            body.len()
        )));
    }

    Ok(CacheEntry::from_parts(
        key,
        ResponsePayload::new(status, headers, body),
        to_u64(created_at),
        to_u64(expires_at),
    ))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}
