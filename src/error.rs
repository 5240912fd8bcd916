//! Error types for the caching proxy
//!
//! Provides unified error handling using thiserror. Only [`ProxyError`]
//! reaches HTTP clients; store and flush failures are logged and absorbed.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::cache::KeyError;
use crate::models::ErrorResponse;

// == Fetch Error ==
/// Failure of the upstream fetch. Never cached.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),

    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    #[error("upstream timed out")]
    Timeout,

    #[error("failed to read upstream body: {0}")]
    Body(String),

    #[error("upstream request failed: {0}")]
    Request(String),
}

// == Store Error ==
/// Failure of the persistent tier.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be decoded back into an entry
    #[error("corrupt entry `{key}`: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("failed to encode entry `{key}`: {reason}")]
    Encode { key: String, reason: String },
}

// == Persistence Error ==
/// A batch commit that still failed after every retry. The batch stays pending.
#[derive(Error, Debug)]
#[error("flush of {pending} entries failed after {attempts} attempts: {source}")]
pub struct PersistenceError {
    pub attempts: u32,
    pub pending: usize,
    #[source]
    pub source: StoreError,
}

// == Proxy Error ==
/// Errors surfaced to proxy clients.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),
}

impl From<KeyError> for ProxyError {
    fn from(err: KeyError) -> Self {
        ProxyError::InvalidRequest(err.to_string())
    }
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Fetch(FetchError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Fetch(_) => StatusCode::BAD_GATEWAY,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse::new(self.to_string()));

        (self.status_code(), body).into_response()
    }
}

// == Result Type Alias ==
pub type Result<T> = std::result::Result<T, ProxyError>;
