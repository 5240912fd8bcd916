//! Cache Key Module
//!
//! Derives canonical cache keys from proxy requests.
//!
//! Normalization rule:
//! - scheme and host are lower-cased, the scheme's default port is dropped and
//!   an empty path becomes `/` (all done by [`Url`] parsing)
//! - the fragment and an empty query are removed, a non-empty query is kept verbatim
//! - trailing slashes are significant: `/a` and `/a/` are different keys
//! - the method is upper-cased
//! - relevant headers are lower-cased by name, trimmed, and sorted

use std::fmt;

use axum::http::{HeaderMap, HeaderName, Method};
use thiserror::Error;
use url::Url;

// == Key Error ==
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl KeyError {
    fn invalid(url: &str, reason: impl Into<String>) -> Self {
        KeyError::InvalidUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

// == Cache Key ==
/// Canonical identifier of a cacheable request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for `method` + `url` + the headers that affect the representation.
    pub fn derive(
        method: &Method,
        url: &str,
        relevant_headers: &[(&str, &str)],
    ) -> Result<Self, KeyError> {
        let url = normalize_url(url)?;
        Ok(Self::from_normalized(method, &url, relevant_headers))
    }

    /// Builds the key from an already normalized URL.
    pub fn from_normalized(method: &Method, url: &Url, relevant_headers: &[(&str, &str)]) -> Self {
        let mut key = format!("{} {}", method.as_str().to_ascii_uppercase(), url);

        let mut parts: Vec<String> = relevant_headers
            .iter()
            .map(|(name, value)| format!("{}={}", name.trim().to_ascii_lowercase(), value.trim()))
            .collect();
        if !parts.is_empty() {
            parts.sort();
            key.push_str(" |");
            key.push_str(&parts.join(";"));
        }

        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// == URL Normalization ==
/// Parses and normalizes a proxied URL. Only `http` and `https` URLs with a host are accepted.
pub fn normalize_url(raw: &str) -> Result<Url, KeyError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| KeyError::invalid(raw, e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(KeyError::invalid(raw, format!("unsupported scheme `{other}`"))),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(KeyError::invalid(raw, "missing host"));
    }

    url.set_fragment(None);
    if url.query() == Some("") {
        url.set_query(None);
    }

    Ok(url)
}

/// Picks the configured header names out of a request's headers.
///
/// Values that are not valid UTF-8 are skipped.
pub fn relevant_headers<'a>(
    headers: &'a HeaderMap,
    names: &'a [HeaderName],
) -> Vec<(&'a str, &'a str)> {
    names
        .iter()
        .flat_map(|name| {
            headers
                .get_all(name)
                .iter()
                .filter_map(move |value| value.to_str().ok().map(|v| (name.as_str(), v)))
        })
        .collect()
}
