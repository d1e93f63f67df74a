//! Durable job scheduler.
//!
//! Jobs move `pending -> processing -> completed`, or back to `pending`
//! with a pushed-out `scheduled_at` after a failed attempt, or to `failed`
//! once attempts run out. Claims are atomic in the record store, so several
//! schedulers may poll the same store without double-processing a job.

use chrono::{DateTime, Utc};
use kwharvest_core::{
    Clock, Job, JobKind, JobPatch, JobPayload, JobStatus, KeywordStatus, NewJob, QueueStats,
    RecordStore,
};
use kwharvest_fetch::RetryStrategy;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::error::QueueError;
use crate::handlers::{Handlers, JobOutcome, batch_limit, validate_payload};
use crate::stats::{ProcessingRecorder, ProcessingStats};

// ============================================================================
// Settings
// ============================================================================

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Sleep between loop iterations.
    pub poll_interval: Duration,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Longest reschedule delay.
    pub max_delay: Duration,
    /// Attempts given to newly enqueued jobs.
    pub default_max_attempts: u32,
    /// Keywords per `fetch_related` job when splitting a batch.
    pub related_batch_size: usize,
    /// Keywords per `count_docs` job when splitting a batch.
    pub docs_batch_size: usize,
    /// Age after which a `processing` job is considered abandoned.
    pub stale_after: chrono::Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            default_max_attempts: 3,
            related_batch_size: 5,
            docs_batch_size: 10,
            stale_after: chrono::Duration::minutes(10),
        }
    }
}

impl SchedulerSettings {
    /// Default sub-batch size for `kind`.
    pub fn batch_size(&self, kind: JobKind) -> usize {
        match kind {
            JobKind::FetchRelated => self.related_batch_size,
            JobKind::CountDocs => self.docs_batch_size,
        }
    }
}

// ============================================================================
// Process Outcome
// ============================================================================

/// Result of one scheduler iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// No job was eligible.
    Idle,
    /// The job's handler succeeded.
    Completed {
        /// Job id.
        job_id: i64,
        /// Job kind.
        kind: JobKind,
        /// What the handler did.
        outcome: JobOutcome,
    },
    /// The attempt failed and the job was rescheduled.
    Retrying {
        /// Job id.
        job_id: i64,
        /// Job kind.
        kind: JobKind,
        /// Failed attempts so far.
        attempts: u32,
        /// Next eligible dispatch time.
        scheduled_at: DateTime<Utc>,
    },
    /// The attempt failed and the job is terminal.
    Failed {
        /// Job id.
        job_id: i64,
        /// Job kind.
        kind: JobKind,
        /// Last error message.
        error: String,
    },
}

// ============================================================================
// Scheduler
// ============================================================================

/// Claims due jobs and dispatches them to their handlers.
pub struct Scheduler {
    store: Arc<dyn RecordStore>,
    handlers: Handlers,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    backoff: RetryStrategy,
    // Held by the one live loop; cleared only when that loop exits.
    running: AtomicBool,
    stop_requested: AtomicBool,
    stats: ProcessingRecorder,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("settings", &self.settings)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler over `store`.
    pub fn new(
        store: Arc<dyn RecordStore>,
        handlers: Handlers,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        let backoff = RetryStrategy::new(settings.default_max_attempts)
            .with_base_delay(settings.base_delay)
            .with_max_delay(settings.max_delay)
            .with_jitter(false);
        Self {
            store,
            handlers,
            clock,
            settings,
            backoff,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stats: ProcessingRecorder::default(),
        }
    }

    /// The scheduler settings.
    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    // ------------------------------------------------------------------------
    // Enqueueing
    // ------------------------------------------------------------------------

    /// Inserts one job. `scheduled_at` defaults to now.
    #[instrument(skip(self, payload), fields(kind = %kind, keywords = payload.keyword_ids.len()))]
    pub async fn enqueue(
        &self,
        kind: JobKind,
        payload: JobPayload,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<i64, QueueError> {
        validate_payload(kind, &payload.keyword_ids)?;
        let now = self.clock.now();
        let job = NewJob {
            kind,
            payload,
            max_attempts: self.settings.default_max_attempts.max(1),
            scheduled_at: scheduled_at.unwrap_or(now),
        };
        let id = self.store.insert_job(&job, now).await?;
        debug!(job_id = id, "Job enqueued");
        Ok(id)
    }

    /// Splits `keyword_ids` into sub-batches and enqueues one job per batch.
    ///
    /// Duplicate ids are dropped. `batch_size` defaults to the configured
    /// size for `kind` and may not exceed the handler's limit.
    pub async fn enqueue_batch(
        &self,
        kind: JobKind,
        keyword_ids: &[i64],
        batch_size: Option<usize>,
    ) -> Result<Vec<i64>, QueueError> {
        let size = batch_size.unwrap_or_else(|| self.settings.batch_size(kind));
        let limit = batch_limit(kind);
        if size == 0 || size > limit {
            return Err(QueueError::invalid_payload(
                kind,
                format!("batch size {size} outside 1..={limit}"),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        let ids: Vec<i64> = keyword_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        let mut job_ids = Vec::with_capacity(ids.len().div_ceil(size));
        for chunk in ids.chunks(size) {
            job_ids.push(self.enqueue(kind, JobPayload::new(chunk.to_vec()), None).await?);
        }

        info!(kind = %kind, keywords = ids.len(), jobs = job_ids.len(), "Enqueued batch");
        Ok(job_ids)
    }

    // ------------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------------

    /// Claims the oldest due job, if any.
    pub async fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        Ok(self
            .store
            .claim_oldest_eligible_job(self.clock.now())
            .await?)
    }

    /// Runs one iteration: claim, dispatch, settle.
    pub async fn process_next(&self) -> Result<ProcessOutcome, QueueError> {
        let Some(job) = self.claim_next().await? else {
            return Ok(ProcessOutcome::Idle);
        };
        debug!(job_id = job.id, kind = %job.kind, attempts = job.attempts, "Claimed job");

        let started = Instant::now();
        match self.handlers.dispatch(&job).await {
            Ok(outcome) => {
                self.complete(&job).await?;
                self.stats.success(job.kind, started.elapsed());
                Ok(ProcessOutcome::Completed {
                    job_id: job.id,
                    kind: job.kind,
                    outcome,
                })
            }
            Err(e) => {
                self.stats.failure(job.kind);
                let message = e.to_string();
                warn!(job_id = job.id, kind = %job.kind, error = %message, "Job attempt failed");

                let retry = if matches!(e, QueueError::InvalidPayload { .. }) {
                    self.fail(&job, &message).await?;
                    false
                } else {
                    self.on_job_failure(&job, &message).await?
                };

                if retry {
                    let updated = self.store.get_job(job.id).await?;
                    let (attempts, scheduled_at) = updated
                        .map_or((job.attempts + 1, job.scheduled_at), |j| {
                            (j.attempts, j.scheduled_at)
                        });
                    Ok(ProcessOutcome::Retrying {
                        job_id: job.id,
                        kind: job.kind,
                        attempts,
                        scheduled_at,
                    })
                } else {
                    Ok(ProcessOutcome::Failed {
                        job_id: job.id,
                        kind: job.kind,
                        error: message,
                    })
                }
            }
        }
    }

    async fn complete(&self, job: &Job) -> Result<(), QueueError> {
        let patch = JobPatch {
            status: Some(JobStatus::Completed),
            completed_at: Some(self.clock.now()),
            error_message: Some(None),
            ..JobPatch::default()
        };
        if !self
            .store
            .update_job(job.id, Some(JobStatus::Processing), &patch)
            .await?
        {
            warn!(job_id = job.id, "Job left processing before completion was recorded");
        }
        Ok(())
    }

    /// Settles a failed attempt. Returns true if the job will be retried.
    ///
    /// Returns false without touching the job when it is no longer
    /// `processing`, e.g. because another worker already settled it.
    ///
    /// With attempts left the job goes back to `pending` after
    /// `min(base × 2^attempts, max)`. Otherwise it is marked `failed` and its
    /// keywords move to `error`.
    pub async fn on_job_failure(&self, job: &Job, error: &str) -> Result<bool, QueueError> {
        if job.attempts.saturating_add(1) >= job.max_attempts {
            self.fail(job, error).await?;
            return Ok(false);
        }

        let attempts = job.attempts + 1;
        let delay = self.backoff.delay_for_attempt(attempts);
        let scheduled_at = self.clock.now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(1));

        let patch = JobPatch {
            status: Some(JobStatus::Pending),
            attempts: Some(attempts),
            scheduled_at: Some(scheduled_at),
            error_message: Some(Some(error.to_string())),
            ..JobPatch::default()
        };
        if !self
            .store
            .update_job(job.id, Some(JobStatus::Processing), &patch)
            .await?
        {
            warn!(job_id = job.id, "Job left processing before the retry was recorded");
            return Ok(false);
        }

        info!(
            job_id = job.id,
            attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Job rescheduled"
        );
        Ok(true)
    }

    async fn fail(&self, job: &Job, error: &str) -> Result<(), QueueError> {
        let now = self.clock.now();
        let patch = JobPatch {
            status: Some(JobStatus::Failed),
            attempts: Some(job.max_attempts.max(job.attempts)),
            completed_at: Some(now),
            error_message: Some(Some(error.to_string())),
            ..JobPatch::default()
        };
        if !self
            .store
            .update_job(job.id, Some(JobStatus::Processing), &patch)
            .await?
        {
            warn!(job_id = job.id, "Job left processing before the failure was recorded");
            return Ok(());
        }
        self.store
            .set_keyword_status(&job.payload.keyword_ids, KeywordStatus::Error, now)
            .await?;

        error!(job_id = job.id, kind = %job.kind, error, "Job failed permanently");
        Ok(())
    }

    /// Returns abandoned `processing` jobs to `pending`.
    pub async fn requeue_stale(&self) -> Result<u64, QueueError> {
        let now = self.clock.now();
        let requeued = self
            .store
            .requeue_stale_jobs(now - self.settings.stale_after, now)
            .await?;
        if requeued > 0 {
            info!(requeued, "Requeued stale jobs");
        }
        Ok(requeued)
    }

    // ------------------------------------------------------------------------
    // Run Loop
    // ------------------------------------------------------------------------

    /// Processes jobs until [`stop`](Self::stop) is called.
    ///
    /// Calling it while a loop is alive, including one that was asked to stop
    /// but is still finishing its iteration, returns at once. Errors of
    /// single iterations are logged and the loop keeps polling.
    pub async fn run_loop(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Scheduler already running");
            return;
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        info!("Scheduler started");

        if let Err(e) = self.requeue_stale().await {
            warn!(error = %e, "Failed to requeue stale jobs");
        }

        while !self.stop_requested.load(Ordering::SeqCst) {
            match self.process_next().await {
                Ok(ProcessOutcome::Idle) => {}
                Ok(outcome) => debug!(?outcome, "Iteration done"),
                Err(e) => error!(error = %e, "Scheduler iteration failed"),
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Scheduler stopped");
    }

    /// Asks the run loop to exit after its current iteration.
    pub fn stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) && self.is_running() {
            info!("Scheduler stop requested");
        }
    }

    /// Returns true until the run loop has exited.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------------

    /// Job counts by status.
    pub async fn get_queue_stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = QueueStats::default();
        for (status, count) in self.store.count_jobs_by_status().await? {
            stats.add(status, count);
        }
        Ok(stats)
    }

    /// In-process processing figures since start.
    pub fn get_processing_stats(&self) -> ProcessingStats {
        self.stats.snapshot()
    }
}
