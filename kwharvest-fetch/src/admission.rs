//! Admission control for upstream calls.
//!
//! A call is admitted when a global slot of its operation class is free and
//! the credential manager can select a usable credential. Admission never
//! waits; [`AdmissionController::queue`] is the only path that polls.

use kwharvest_core::{CoreError, Credential, OperationClass, Provider};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::credentials::CredentialManager;
use crate::error::FetchError;
use crate::slots::{SlotPermit, SlotUsage};
use crate::stats::{RateLimitStats, StatsWindow};

/// Default interval between admission attempts of a queued call.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const UNHEALTHY_ERROR_RATE: f64 = 0.05;
const UNHEALTHY_REQUESTS_PER_SECOND: u64 = 10;
const UNHEALTHY_QUEUE_LENGTH: u64 = 100;

/// A granted admission: the selected credential and the held global slot.
///
/// Dropping it releases the slot.
#[derive(Debug)]
pub struct Admission<'a> {
    /// Credential to call with.
    pub credential: Credential,
    permit: SlotPermit<'a>,
}

/// Result of [`AdmissionController::health_check`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// No issue was found.
    pub healthy: bool,
    /// Human-readable problems.
    pub issues: Vec<String>,
    /// Statistics the verdict was based on.
    pub stats: RateLimitStats,
}

/// Gatekeeper in front of every upstream call.
#[derive(Debug)]
pub struct AdmissionController {
    credentials: Arc<CredentialManager>,
    stats: StatsWindow,
    poll_interval: Duration,
}

impl AdmissionController {
    /// Creates a controller over a credential manager.
    pub fn new(credentials: Arc<CredentialManager>) -> Self {
        Self {
            credentials,
            stats: StatsWindow::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets how often [`Self::queue`] retries admission.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The credential manager behind this controller.
    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    /// Tries to admit one call. `Ok(None)` means refused.
    pub async fn admit(
        &self,
        provider: Provider,
        operation: OperationClass,
    ) -> Result<Option<Admission<'_>>, CoreError> {
        let Some(permit) = self.credentials.try_slot_permit(operation) else {
            debug!(provider = %provider, operation = %operation, "No global slot free");
            return Ok(None);
        };

        match self.credentials.select_credential(provider).await? {
            Some(credential) => Ok(Some(Admission { credential, permit })),
            None => {
                debug!(provider = %provider, operation = %operation, "No credential to admit with");
                Ok(None)
            }
        }
    }

    /// Tries to admit one call and keeps the global slot on success.
    ///
    /// The caller must hand the slot back with [`Self::release`].
    pub async fn try_admit(
        &self,
        provider: Provider,
        operation: OperationClass,
    ) -> Result<bool, CoreError> {
        Ok(match self.admit(provider, operation).await? {
            Some(admission) => {
                admission.permit.keep();
                true
            }
            None => false,
        })
    }

    /// Releases a slot taken by [`Self::try_admit`].
    pub fn release(&self, operation: OperationClass) {
        self.credentials.release_global_slot(operation);
    }

    /// Runs `work` under admission, or fails with [`FetchError::AdmissionDenied`].
    ///
    /// The request is counted whatever the outcome, failures are counted as
    /// errors, and the global slot is released when `work` finishes. Credential
    /// bookkeeping is left to `work`.
    pub async fn execute<T, F, Fut>(
        &self,
        provider: Provider,
        operation: OperationClass,
        work: F,
    ) -> Result<T, FetchError>
    where
        F: FnOnce(Credential) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let Some(admission) = self.admit(provider, operation).await? else {
            return Err(FetchError::AdmissionDenied {
                provider,
                operation,
            });
        };
        self.run_admitted(provider, operation, admission, work).await
    }

    /// Like [`Self::execute`], but waits for admission instead of failing.
    ///
    /// Admission is retried every poll interval until it succeeds or the
    /// returned future is dropped. Not durable.
    pub async fn queue<T, F, Fut>(
        &self,
        provider: Provider,
        operation: OperationClass,
        work: F,
    ) -> Result<T, FetchError>
    where
        F: FnOnce(Credential) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let waiting = QueuedCall::new(&self.stats, provider, operation);
        let admission = loop {
            if let Some(admission) = self.admit(provider, operation).await? {
                break admission;
            }
            tokio::time::sleep(self.poll_interval).await;
        };
        drop(waiting);

        self.run_admitted(provider, operation, admission, work).await
    }

    async fn run_admitted<T, F, Fut>(
        &self,
        provider: Provider,
        operation: OperationClass,
        admission: Admission<'_>,
        work: F,
    ) -> Result<T, FetchError>
    where
        F: FnOnce(Credential) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let Admission { credential, permit } = admission;
        let credential_id = credential.id;

        self.stats.record_request(provider, operation);
        let in_flight = InFlightCall::new(&self.stats, provider, operation);
        let started = Instant::now();

        let result = work(credential).await;

        if let Err(e) = &result {
            self.stats.record_error(provider, operation);
            warn!(
                provider = %provider,
                operation = %operation,
                credential_id,
                duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                error = %e,
                "Admitted call failed"
            );
        }
        drop(in_flight);
        drop(permit);
        result
    }

    /// Request and error rates over the trailing window.
    pub fn get_stats(&self) -> RateLimitStats {
        self.stats.snapshot()
    }

    /// Flags a high error rate, a high request rate, or a long queue.
    pub fn health_check(&self) -> HealthReport {
        let stats = self.get_stats();
        let mut issues = Vec::new();

        if stats.error_rate > UNHEALTHY_ERROR_RATE {
            issues.push(format!("High error rate: {:.1}%", stats.error_rate * 100.0));
        }
        if stats.requests_per_second > UNHEALTHY_REQUESTS_PER_SECOND {
            issues.push(format!(
                "High request rate: {}/s",
                stats.requests_per_second
            ));
        }
        if stats.queued_requests > UNHEALTHY_QUEUE_LENGTH {
            issues.push(format!(
                "Long admission queue: {} requests waiting",
                stats.queued_requests
            ));
        }

        HealthReport {
            healthy: issues.is_empty(),
            issues,
            stats,
        }
    }

    /// Global slot occupancy per operation class.
    pub fn slot_stats(&self) -> Vec<SlotUsage> {
        self.credentials.slot_stats()
    }

    /// Clears the trailing request and error windows.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }
}

/// Counts a call as queued for as long as it lives.
struct QueuedCall<'a> {
    stats: &'a StatsWindow,
    provider: Provider,
    operation: OperationClass,
}

impl<'a> QueuedCall<'a> {
    fn new(stats: &'a StatsWindow, provider: Provider, operation: OperationClass) -> Self {
        stats.enqueued(provider, operation);
        Self {
            stats,
            provider,
            operation,
        }
    }
}

impl Drop for QueuedCall<'_> {
    fn drop(&mut self) {
        self.stats.dequeued(self.provider, self.operation);
    }
}

/// Counts a call as an active connection for as long as it lives.
struct InFlightCall<'a> {
    stats: &'a StatsWindow,
    provider: Provider,
    operation: OperationClass,
}

impl<'a> InFlightCall<'a> {
    fn new(stats: &'a StatsWindow, provider: Provider, operation: OperationClass) -> Self {
        stats.connection_started(provider, operation);
        Self {
            stats,
            provider,
            operation,
        }
    }
}

impl Drop for InFlightCall<'_> {
    fn drop(&mut self) {
        self.stats.connection_finished(self.provider, self.operation);
    }
}
