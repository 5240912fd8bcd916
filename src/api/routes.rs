//! API Routes
//!
//! Configures the Axum router: admin endpoints under `/_cache` and the proxy fallback.

use axum::{middleware, routing::get, Router};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{
    absolute_form_to_proxy, health_handler, proxy_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /_cache/health` - Health check including store reachability
/// - `GET /_cache/stats` - Tier, batch and store statistics
/// - anything else - Proxied through the cache
///
/// Admin paths are only matched for origin-form requests; an absolute-form
/// `GET http://host/_cache/stats` is proxied like any other URL.
///
/// # Middleware
/// - Tracing: Logs all requests
/// - Concurrency limit: At most `max_connections` requests in flight
pub fn create_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/_cache/health", get(health_handler))
        .route("/_cache/stats", get(stats_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            absolute_form_to_proxy,
        ))
        .fallback(proxy_handler)
        .layer(TraceLayer::new_for_http())
        .layer(GlobalConcurrencyLimitLayer::new(max_connections.max(1)))
        .with_state(state)
}
