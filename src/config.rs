//! Configuration Module
//!
//! Handles loading and managing proxy configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderName;

use crate::cache::BatchConfig;

/// Proxy configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port
    pub port: u16,
    /// Lifetime of cached responses in seconds
    pub ttl_seconds: u64,
    /// Memory tier capacity (0 disables the tier)
    pub max_memory_entries: usize,
    /// Write batch size that triggers a flush
    pub batch_max_size: usize,
    /// Maximum age of a queued write before a flush is forced
    pub batch_max_delay_seconds: f64,
    /// SQLite database file
    pub db_path: PathBuf,
    /// Maximum concurrently served requests
    pub max_connections: usize,
    pub upstream_timeout_seconds: u64,
    /// Commit retries before a flush gives up
    pub flush_max_retries: u32,
    pub flush_retry_backoff_ms: u64,
    /// TTL sweep interval in seconds
    pub sweep_interval_seconds: u64,
    /// Request headers that take part in the cache key
    pub key_headers: Vec<String>,
    /// Log file path; `None` logs to stdout only
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `PORT` - Listen port (default: 3142)
    /// - `TTL_SECONDS` - Response lifetime (default: 2592000, 30 days)
    /// - `MAX_MEMORY_ENTRIES` - Memory tier capacity (default: 1000)
    /// - `BATCH_MAX_SIZE` - Flush threshold in entries (default: 10)
    /// - `BATCH_MAX_DELAY_SECONDS` - Flush deadline, fractional (default: 1.0)
    /// - `DB_PATH` - SQLite file (default: cache.db)
    /// - `MAX_CONNECTIONS` - Concurrent request limit (default: 100)
    /// - `UPSTREAM_TIMEOUT_SECONDS` - Origin request timeout (default: 30)
    /// - `FLUSH_MAX_RETRIES` - Commit retries per flush (default: 3)
    /// - `FLUSH_RETRY_BACKOFF_MS` - First retry backoff (default: 100)
    /// - `SWEEP_INTERVAL_SECONDS` - TTL sweep interval (default: 60)
    /// - `KEY_HEADERS` - Comma-separated header names (default: none)
    /// - `LOG_FILE` - Log file, empty to disable (default: proxy.log)
    ///
    /// Unparseable values fall back to their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a Config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let batch_max_delay_seconds = parse_var(&lookup, "BATCH_MAX_DELAY_SECONDS")
            .filter(|secs: &f64| secs.is_finite() && *secs >= 0.0)
            .unwrap_or(defaults.batch_max_delay_seconds);

        Self {
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            ttl_seconds: parse_var(&lookup, "TTL_SECONDS").unwrap_or(defaults.ttl_seconds),
            max_memory_entries: parse_var(&lookup, "MAX_MEMORY_ENTRIES")
                .unwrap_or(defaults.max_memory_entries),
            batch_max_size: parse_var(&lookup, "BATCH_MAX_SIZE")
                .unwrap_or(defaults.batch_max_size)
                .max(1),
            batch_max_delay_seconds,
            db_path: lookup("DB_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            max_connections: parse_var(&lookup, "MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections)
                .max(1),
            upstream_timeout_seconds: parse_var(&lookup, "UPSTREAM_TIMEOUT_SECONDS")
                .unwrap_or(defaults.upstream_timeout_seconds),
            flush_max_retries: parse_var(&lookup, "FLUSH_MAX_RETRIES")
                .unwrap_or(defaults.flush_max_retries),
            flush_retry_backoff_ms: parse_var(&lookup, "FLUSH_RETRY_BACKOFF_MS")
                .unwrap_or(defaults.flush_retry_backoff_ms),
            sweep_interval_seconds: parse_var(&lookup, "SWEEP_INTERVAL_SECONDS")
                .unwrap_or(defaults.sweep_interval_seconds)
                .max(1),
            key_headers: lookup("KEY_HEADERS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.key_headers),
            log_file: match lookup("LOG_FILE") {
                Some(v) if v.trim().is_empty() => None,
                Some(v) => Some(PathBuf::from(v.trim())),
                None => defaults.log_file,
            },
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_size: self.batch_max_size,
            max_delay: Duration::try_from_secs_f64(self.batch_max_delay_seconds)
                .unwrap_or(Duration::from_secs(1)),
            max_retries: self.flush_max_retries,
            retry_backoff: Duration::from_millis(self.flush_retry_backoff_ms),
        }
    }

    /// Parsed `key_headers`; names that are not valid header names are skipped.
    pub fn key_header_names(&self) -> Vec<HeaderName> {
        self.key_headers
            .iter()
            .filter_map(|name| HeaderName::from_str(name).ok())
            .collect()
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|v| v.trim().parse().ok())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| part.trim().to_ascii_lowercase())
        .filter(|part| !part.is_empty())
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3142,
            ttl_seconds: 2_592_000,
            max_memory_entries: 1000,
            batch_max_size: 10,
            batch_max_delay_seconds: 1.0,
            db_path: PathBuf::from("cache.db"),
            max_connections: 100,
            upstream_timeout_seconds: 30,
            flush_max_retries: 3,
            flush_retry_backoff_ms: 100,
            sweep_interval_seconds: 60,
            key_headers: Vec::new(),
            log_file: Some(PathBuf::from("proxy.log")),
        }
    }
}
