//! Mini Proxy Cache - A caching forward HTTP proxy
//!
//! Answers `GET` requests from an in-memory LRU/TTL tier, then from a SQLite
//! store fed by a write-behind batch, and only then from the origin server.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;
pub mod tasks;
pub mod upstream;

pub use api::AppState;
pub use config::Config;
pub use tasks::{spawn_flush_task, spawn_sweep_task};
