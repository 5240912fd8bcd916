//! Upstream Module
//!
//! The origin-fetch collaborator used on a full cache miss.

mod http;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use url::Url;

use crate::cache::ResponsePayload;
use crate::error::FetchError;

pub use self::http::HttpUpstream;

/// A request to forward to the origin server.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Normalized absolute URL
    pub url: Url,
    /// Client request headers, hop-by-hop headers included
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamRequest {
    /// Bodiless GET for `url`.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

// == Upstream ==
/// Fetches a complete response from the origin.
///
/// Implementations buffer the whole body; a partial response is an error.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, request: &UpstreamRequest) -> Result<ResponsePayload, FetchError>;
}
