//! API Handlers
//!
//! The forward-proxy fallback handler and the admin endpoints.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        header::{HeaderName, HeaderValue, HOST},
        HeaderMap, Method, StatusCode, Uri,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, warn};

use crate::cache::{
    normalize_url, relevant_headers, CacheCoordinator, CacheKey, Resolution,
};
use crate::error::{ProxyError, Result};
use crate::models::{HealthResponse, MemoryStatsResponse, StatsResponse};
use crate::upstream::UpstreamRequest;

/// Largest request body read before forwarding.
pub const MAX_REQUEST_BODY: usize = 10 * 1024 * 1024;

/// Header reporting which tier answered.
pub const X_CACHE: &str = "x-cache";

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<CacheCoordinator>,
    /// Request headers that take part in the cache key
    pub key_headers: Arc<Vec<HeaderName>>,
}

impl AppState {
    pub fn new(coordinator: Arc<CacheCoordinator>, key_headers: Vec<HeaderName>) -> Self {
        Self {
            coordinator,
            key_headers: Arc::new(key_headers),
        }
    }
}

/// Fallback handler: proxies every request that is not an admin route.
///
/// Accepts absolute-form targets (`GET http://host/path`) and origin-form
/// targets with a `Host` header. Only `GET` is served; `CONNECT` tunnels are
/// refused.
pub async fn proxy_handler(State(state): State<AppState>, request: Request) -> Result<Response> {
    let (parts, body) = request.into_parts();

    if parts.method == Method::CONNECT {
        return Err(ProxyError::MethodNotAllowed(
            "CONNECT tunnelling is not supported".to_string(),
        ));
    }
    if parts.method != Method::GET {
        return Err(ProxyError::MethodNotAllowed(parts.method.to_string()));
    }

    let target = target_url(&parts.uri, &parts.headers)?;
    let url = normalize_url(&target)?;
    let key = {
        let headers = relevant_headers(&parts.headers, &state.key_headers);
        CacheKey::from_normalized(&parts.method, &url, &headers)
    };

    let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|e| ProxyError::InvalidRequest(format!("failed to read request body: {}", e)))?;

    let upstream_request = UpstreamRequest {
        method: parts.method,
        url,
        headers: parts.headers,
        body,
    };

    let resolution = state.coordinator.resolve(&key, &upstream_request).await?;
    debug!(
        key = %key,
        source = resolution.source.header_value(),
        status = resolution.payload.status,
        "request resolved"
    );

    Ok(into_http_response(resolution))
}

/// Route layer for the admin endpoints: an absolute-form target such as
/// `http://origin/_cache/stats` belongs to an origin server and is proxied.
pub async fn absolute_form_to_proxy(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().authority().is_some() {
        return proxy_handler(State(state), request).await.into_response();
    }
    next.run(request).await
}

/// Handler for GET /_cache/stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let coordinator = &state.coordinator;

    let memory = {
        let memory = coordinator.memory().read().await;
        MemoryStatsResponse::new(&memory.stats(), memory.capacity())
    };

    let store = match coordinator.store_summary().await {
        Ok(summary) => Some(summary),
        Err(err) => {
            warn!(error = %err, "failed to summarize persistent store");
            None
        }
    };

    Json(StatsResponse {
        memory,
        requests: coordinator.resolve_stats(),
        batch: coordinator.batch_stats(),
        store,
    })
}

/// Handler for GET /_cache/health
///
/// Reports 503 when the persistent store cannot be reached.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.coordinator.store().health_check().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse::healthy())),
        Err(err) => {
            warn!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse::degraded(format!("store unreachable: {}", err))),
            )
        }
    }
}

/// Absolute URL of the proxied resource.
fn target_url(uri: &Uri, headers: &HeaderMap) -> Result<String> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Ok(uri.to_string());
    }

    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .ok_or_else(|| {
            ProxyError::InvalidRequest(
                "request has neither an absolute URL nor a Host header".to_string(),
            )
        })?;
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());

    Ok(format!("http://{}{}", host, path))
}

fn into_http_response(resolution: Resolution) -> Response {
    let payload = resolution.payload;

    let mut response = Response::new(Body::from(payload.body.clone()));
    *response.status_mut() =
        StatusCode::from_u16(payload.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let headers = response.headers_mut();
    for (name, value) in &payload.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!(header = %name, "skipping unrepresentable header"),
        }
    }
    headers.insert(
        HeaderName::from_static(X_CACHE),
        HeaderValue::from_static(resolution.source.header_value()),
    );

    response
}
