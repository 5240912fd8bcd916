//! Response models for the admin endpoints
//!
//! This module defines the DTOs serialized into JSON response bodies.

pub mod responses;

// Re-export commonly used types
pub use responses::{ErrorResponse, HealthResponse, MemoryStatsResponse, StatsResponse};
