//! Retrying upstream caller.
//!
//! Every attempt is admitted through the [`AdmissionController`]. The
//! outcome of each admitted attempt is written back to the credential: a
//! success consumes a token and counts against the daily quota, an HTTP
//! failure degrades the credential according to its status.

use kwharvest_core::{Credential, OperationClass, Provider, UpstreamError};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::admission::AdmissionController;
use crate::error::FetchError;
use crate::retry::RetryStrategy;

/// Tokens consumed by one successful upstream call.
const TOKENS_PER_CALL: f64 = 1.0;

/// Admission, credential bookkeeping and retry with jittered backoff.
#[derive(Debug, Clone)]
pub struct UpstreamCaller {
    admission: Arc<AdmissionController>,
    retry: RetryStrategy,
}

impl UpstreamCaller {
    /// Creates a caller with the given retry strategy.
    pub fn new(admission: Arc<AdmissionController>, retry: RetryStrategy) -> Self {
        Self { admission, retry }
    }

    /// The admission controller behind this caller.
    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// The retry strategy.
    pub fn retry_strategy(&self) -> &RetryStrategy {
        &self.retry
    }

    /// Calls an upstream, retrying transient failures.
    ///
    /// Admission refusals, 429s, 5xx, timeouts and network errors are
    /// retried up to the strategy's attempt limit with jittered exponential
    /// backoff. 401/403 and other client errors abort at once. The last
    /// error is returned when attempts run out.
    pub async fn call<T, F, Fut>(
        &self,
        provider: Provider,
        operation: OperationClass,
        mut request: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let pending = &mut request;
            let result = self
                .admission
                .execute(provider, operation, move |credential| {
                    self.attempt(credential, pending)
                })
                .await;

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if attempt >= max_attempts || !self.retry.should_retry(&error) {
                if error.is_auth_rejected() {
                    warn!(provider = %provider, operation = %operation, "Credential rejected, aborting call");
                }
                return Err(error);
            }

            let delay = self.retry.jittered_delay(attempt);
            debug!(
                provider = %provider,
                operation = %operation,
                attempt,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Retrying upstream call"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt<T, F, Fut>(
        &self,
        credential: Credential,
        request: &mut F,
    ) -> Result<T, FetchError>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let credentials = self.admission.credentials();
        let credential_id = credential.id;

        match request(credential).await {
            Ok(value) => {
                if let Err(e) = credentials.record_usage(credential_id, TOKENS_PER_CALL).await {
                    warn!(credential_id, error = %e, "Failed to record credential usage");
                }
                Ok(value)
            }
            Err(error) => {
                if let Some(status) = error.http_status() {
                    if let Err(e) = credentials
                        .record_failure(credential_id, status, &error.to_string())
                        .await
                    {
                        warn!(credential_id, error = %e, "Failed to record credential failure");
                    }
                }
                Err(FetchError::Upstream(error))
            }
        }
    }
}
