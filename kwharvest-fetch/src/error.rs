//! Fetch error types.

use kwharvest_core::{CoreError, OperationClass, Provider, UpstreamError};
use thiserror::Error;

// ============================================================================
// Main Fetch Error
// ============================================================================

/// Error type for admitted upstream calls.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No global slot or no usable credential right now.
    #[error("Admission denied for {provider}/{operation}")]
    AdmissionDenied {
        /// Provider that was asked for.
        provider: Provider,
        /// Operation class that was asked for.
        operation: OperationClass,
    },

    /// The upstream call failed.
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Credential bookkeeping failed.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FetchError {
    /// Returns true if the call was refused before reaching the upstream.
    pub fn is_admission_denied(&self) -> bool {
        matches!(self, FetchError::AdmissionDenied { .. })
    }

    /// The upstream failure, if this is one.
    pub fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            FetchError::Upstream(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true for 401/403 upstream answers.
    pub fn is_auth_rejected(&self) -> bool {
        self.upstream().is_some_and(UpstreamError::is_auth_rejected)
    }

    /// Returns true for 429 upstream answers.
    pub fn is_rate_limited(&self) -> bool {
        self.upstream().is_some_and(UpstreamError::is_rate_limited)
    }
}

// ============================================================================
// HTTP Error
// ============================================================================

/// HTTP-specific error type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Request error.
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Domain not allowed.
    #[error("Domain not allowed: {0}")]
    DomainNotAllowed(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid header value.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

impl From<HttpError> for UpstreamError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Request(e) if e.is_timeout() => UpstreamError::Timeout,
            HttpError::Request(e) if e.is_decode() => UpstreamError::InvalidResponse(e.to_string()),
            HttpError::Request(e) => match e.status() {
                Some(status) => UpstreamError::status(status.as_u16(), e.to_string()),
                None => UpstreamError::Network(e.to_string()),
            },
            other => UpstreamError::InvalidRequest(other.to_string()),
        }
    }
}
