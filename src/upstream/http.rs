//! reqwest-backed origin client.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use reqwest::redirect::Policy;
use tracing::debug;

use super::{Upstream, UpstreamRequest};
use crate::cache::ResponsePayload;
use crate::error::FetchError;

/// Connection-scoped headers that must not be forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

// == HTTP Upstream ==
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    /// Builds a client whose requests fail with [`FetchError::Timeout`] after `timeout`.
    ///
    /// Redirects are passed through to the client rather than followed.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, request: &UpstreamRequest) -> Result<ResponsePayload, FetchError> {
        debug!(method = %request.method, url = %request.url, "fetching from upstream");

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(forwardable_request_headers(&request.headers))
            .body(request.body.clone())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let mut headers = storable_response_headers(response.headers());
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        headers.push(("content-length".to_string(), body.len().to_string()));
        Ok(ResponsePayload::new(status, headers, body))
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Client headers minus hop-by-hop ones; `Host` and `Content-Length` are set by reqwest.
fn forwardable_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name_str = name.as_str();
        if is_hop_by_hop(name_str) || name_str == "host" || name_str == "content-length" {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}

/// Response headers as stored: hop-by-hop headers and the upstream length are dropped,
/// since the body is fully buffered and re-framed.
fn storable_response_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()) && name.as_str() != "content-length")
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_connect() {
        FetchError::Unreachable(err.to_string())
    } else if err.is_body() || err.is_decode() {
        FetchError::Body(err.to_string())
    } else if err.is_builder() {
        FetchError::InvalidUrl(err.to_string())
    } else {
        FetchError::Request(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum::{routing::get, Router};
    use url::Url;

    async fn spawn_origin() -> String {
        let app = Router::new()
            .route("/hello", get(|| async { ([("x-origin", "yes")], "hello") }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    "late"
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_request_headers_drop_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("proxy-authorization", HeaderValue::from_static("Basic x"));
        headers.insert("host", HeaderValue::from_static("example.com"));
        headers.insert("accept", HeaderValue::from_static("text/html"));

        let forwarded = forwardable_request_headers(&headers);

        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded["accept"], "text/html");
    }

    #[test]
    fn test_response_headers_drop_framing() {
        let mut headers = HeaderMap::new();
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("content-length", HeaderValue::from_static("99"));
        headers.insert("etag", HeaderValue::from_static("\"abc\""));

        let stored = storable_response_headers(&headers);

        assert_eq!(stored, vec![("etag".to_string(), "\"abc\"".to_string())]);
    }

    #[tokio::test]
    async fn test_fetch_buffers_body_and_sets_length() {
        let origin = spawn_origin().await;
        let upstream = HttpUpstream::new(Duration::from_secs(5)).unwrap();
        let url = Url::parse(&format!("{}/hello", origin)).unwrap();

        let payload = upstream.fetch(&UpstreamRequest::get(url)).await.unwrap();

        assert_eq!(payload.status, 200);
        assert_eq!(payload.body.as_ref(), b"hello");
        assert_eq!(payload.header("content-length"), Some("5"));
        assert_eq!(payload.header("x-origin"), Some("yes"));
        assert_eq!(payload.header("transfer-encoding"), None);
    }

    #[tokio::test]
    async fn test_fetch_non_success_status_is_returned() {
        let origin = spawn_origin().await;
        let upstream = HttpUpstream::new(Duration::from_secs(5)).unwrap();
        let url = Url::parse(&format!("{}/missing", origin)).unwrap();

        let payload = upstream.fetch(&UpstreamRequest::get(url)).await.unwrap();
        assert_eq!(payload.status, 404);
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let origin = spawn_origin().await;
        let upstream = HttpUpstream::new(Duration::from_millis(200)).unwrap();
        let url = Url::parse(&format!("{}/slow", origin)).unwrap();

        let err = upstream.fetch(&UpstreamRequest::get(url)).await.unwrap_err();
        assert_eq!(err, FetchError::Timeout);
    }

    #[tokio::test]
    async fn test_fetch_unreachable() {
        // bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let upstream = HttpUpstream::new(Duration::from_secs(5)).unwrap();
        let url = Url::parse(&format!("http://{}/", addr)).unwrap();

        let err = upstream.fetch(&UpstreamRequest::get(url)).await.unwrap_err();
        assert!(matches!(err, FetchError::Unreachable(_)), "got {:?}", err);
    }
}
