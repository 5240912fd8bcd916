//! API Module
//!
//! HTTP front end of the caching proxy.
//!
//! # Endpoints
//! - `GET /_cache/health` - Health check endpoint
//! - `GET /_cache/stats` - Cache statistics
//! - fallback - Forward proxy for `GET` requests

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
