//! Core error types for kwharvest.

use thiserror::Error;

/// Core error type for kwharvest operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Record not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record already exists or a concurrent update won.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid data from storage or an API response.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The backing record store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Returns true if the record store was unavailable rather than the data wrong.
    pub fn is_storage(&self) -> bool {
        matches!(self, CoreError::Storage(_))
    }
}

// ============================================================================
// Upstream Error
// ============================================================================

/// Typed failure of one upstream API call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// The upstream answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The call exceeded its timeout.
    #[error("Request timed out")]
    Timeout,

    /// Connection-level failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The upstream answered but the body could not be understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The request was rejected locally before it was sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl UpstreamError {
    /// Creates a status error.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// HTTP status code, if the upstream answered.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 429 Too Many Requests.
    pub fn is_rate_limited(&self) -> bool {
        self.http_status() == Some(429)
    }

    /// 401 or 403.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self.http_status(), Some(401 | 403))
    }

    /// Rate limits, server errors, timeouts and connection failures.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Timeout | Self::Network(_) => true,
            Self::InvalidResponse(_) | Self::InvalidRequest(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_classification() {
        assert!(UpstreamError::status(429, "slow down").is_rate_limited());
        assert!(UpstreamError::status(403, "nope").is_auth_rejected());
        assert!(UpstreamError::status(401, "nope").is_auth_rejected());
        assert!(UpstreamError::status(503, "down").is_transient());
        assert!(UpstreamError::Timeout.is_transient());
        assert!(!UpstreamError::status(400, "bad").is_transient());
        assert!(!UpstreamError::status(403, "nope").is_transient());
        assert_eq!(UpstreamError::Timeout.http_status(), None);
    }
}
