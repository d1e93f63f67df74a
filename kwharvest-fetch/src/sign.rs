//! HMAC-SHA256 request signing for the search-ad API.
//!
//! The signature covers `"{timestamp}.{method}.{uri}"` and is sent base64
//! encoded alongside the timestamp.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use ring::hmac;

/// Signs requests with a credential's secret.
pub struct RequestSigner {
    key: hmac::Key,
}

impl RequestSigner {
    /// Creates a signer for `secret`.
    pub fn new(secret: &str) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
        }
    }

    /// Returns the base64 signature of one request.
    pub fn sign(&self, timestamp: &str, method: &str, uri: &str) -> String {
        let message = format!("{timestamp}.{method}.{uri}");
        let tag = hmac::sign(&self.key, message.as_bytes());
        STANDARD.encode(tag.as_ref())
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner").finish_non_exhaustive()
    }
}
