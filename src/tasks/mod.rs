//! Background Tasks Module
//!
//! Long-running tasks spawned at startup and stopped through a shared
//! cancellation token.
//!
//! # Tasks
//! - Flush: commits the write batch when it is due
//! - TTL Sweep: removes expired entries from both tiers at configured intervals

mod flush;
mod sweep;

pub use flush::spawn_flush_task;
pub use sweep::spawn_sweep_task;
