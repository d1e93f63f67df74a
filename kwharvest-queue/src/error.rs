//! Queue error types.

use kwharvest_core::{CoreError, JobKind, Provider};
use kwharvest_fetch::FetchError;
use thiserror::Error;

/// Error type for scheduling and job handling.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The record store failed or rejected an operation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An admitted upstream call failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A job payload does not fit the handler's batch contract.
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload {
        /// Job kind the payload was meant for.
        kind: JobKind,
        /// What is wrong with it.
        reason: String,
    },

    /// No credential of the provider can serve a call right now.
    #[error("No usable {0} credential")]
    NoUsableCredential(Provider),

    /// A seed term is already registered.
    #[error("Keyword already exists: {0}")]
    DuplicateKeyword(String),

    /// A seed term is empty after normalization.
    #[error("Keyword term is empty")]
    EmptyKeyword,
}

impl QueueError {
    /// Creates an invalid payload error.
    pub fn invalid_payload(kind: JobKind, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            kind,
            reason: reason.into(),
        }
    }

    /// Returns true if the record store itself was unavailable.
    pub fn is_storage(&self) -> bool {
        match self {
            QueueError::Core(e) => e.is_storage(),
            QueueError::Fetch(FetchError::Core(e)) => e.is_storage(),
            _ => false,
        }
    }

    /// Returns true if an upstream rejected the credential (401/403).
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, QueueError::Fetch(e) if e.is_auth_rejected())
    }
}
