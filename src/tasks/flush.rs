//! Write-Batch Flush Task
//!
//! Background task that commits the write batch once it is due by size or age.

use std::future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::WriteBatcher;

/// Spawns the task that drives [`WriteBatcher::flush`].
///
/// The task wakes when a batch starts, when the size threshold is reached and
/// when the oldest entry's deadline passes. Cancellation is only observed
/// between commits, so a running transaction is never cut short; the caller
/// runs a final flush after awaiting the handle.
///
/// # Arguments
/// * `batcher` - Shared write batcher
/// * `shutdown` - Token cancelled on graceful shutdown
pub fn spawn_flush_task(batcher: Arc<WriteBatcher>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let max_delay = batcher.config().max_delay;
        info!(
            max_size = batcher.config().max_size,
            max_delay_ms = max_delay.as_millis() as u64,
            "Starting write-batch flush task"
        );

        loop {
            let deadline = batcher.next_deadline();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = batcher.notified() => {}
                _ = wait_until(deadline) => {}
            }

            if !batcher.flush_due() {
                continue;
            }

            if let Err(err) = batcher.flush().await {
                debug!(error = %err, "flush failed, backing off");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(max_delay) => {}
                }
            }
        }

        debug!("Flush task stopped");
    })
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}
