//! TTL Sweep Task
//!
//! Background task that periodically removes expired entries from both tiers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::entry::current_timestamp_ms;
use crate::cache::VolatileCache;
use crate::storage::EntryStore;

/// Spawns a background task that sweeps expired entries every `interval`.
///
/// Lookups already ignore expired entries; the sweep only reclaims space.
///
/// # Arguments
/// * `memory` - Shared memory tier
/// * `store` - Persistent tier
/// * `interval` - Time between sweeps
/// * `shutdown` - Token cancelled on graceful shutdown
pub fn spawn_sweep_task(
    memory: Arc<RwLock<VolatileCache>>,
    store: Arc<dyn EntryStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            "Starting TTL sweep task"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let from_memory = memory.write().await.cleanup_expired();

            let from_store = match store.sweep_expired(current_timestamp_ms()).await {
                Ok(removed) => removed,
                Err(err) => {
                    warn!(error = %err, "TTL sweep of persistent store failed");
                    0
                }
            };

            if from_memory > 0 || from_store > 0 {
                info!(from_memory, from_store, "TTL sweep removed expired entries");
            } else {
                debug!("TTL sweep: no expired entries found");
            }
        }

        debug!("Sweep task stopped");
    })
}
