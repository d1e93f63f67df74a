//! Job types.
//!
//! A job is a durable, retryable unit of batched work tracked through
//! `pending -> processing -> completed | failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::credential::{OperationClass, Provider};
use crate::error::CoreError;

// ============================================================================
// Job Kind
// ============================================================================

/// The closed set of job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Fetch related keywords for a group of seed keywords.
    FetchRelated,
    /// Count documents per section for each keyword.
    CountDocs,
}

impl JobKind {
    /// Returns the stable identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchRelated => "fetch_related",
            Self::CountDocs => "count_docs",
        }
    }

    /// Returns all job kinds.
    pub fn all() -> &'static [JobKind] {
        &[Self::FetchRelated, Self::CountDocs]
    }

    /// Operation class the handler admits its calls under.
    pub fn operation_class(&self) -> OperationClass {
        match self {
            Self::FetchRelated => OperationClass::Related,
            Self::CountDocs => OperationClass::Docs,
        }
    }

    /// Upstream provider the handler calls.
    pub fn provider(&self) -> Provider {
        self.operation_class().provider()
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetch_related" | "related" => Ok(Self::FetchRelated),
            "count_docs" | "docs" => Ok(Self::CountDocs),
            other => Err(CoreError::InvalidData(format!("unknown job kind: {other}"))),
        }
    }
}

// ============================================================================
// Job Status
// ============================================================================

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `scheduled_at`.
    #[default]
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Finished successfully (terminal).
    Completed,
    /// Attempts exhausted (terminal).
    Failed,
}

impl JobStatus {
    /// Returns the stable identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns true for `completed` and `failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::InvalidData(format!("unknown job status: {other}"))),
        }
    }
}

// ============================================================================
// Job
// ============================================================================

/// Subjects a job operates on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Keyword ids.
    pub keyword_ids: Vec<i64>,
}

impl JobPayload {
    /// Creates a payload from keyword ids.
    pub fn new(keyword_ids: Vec<i64>) -> Self {
        Self { keyword_ids }
    }

    /// Serializes the payload for storage.
    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a stored payload.
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// A durable unit of batched work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Store-assigned identifier.
    pub id: i64,
    /// Job type tag.
    #[serde(rename = "type")]
    pub kind: JobKind,
    /// Subjects.
    pub payload: JobPayload,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Attempts allowed before the job fails.
    pub max_attempts: u32,
    /// Earliest eligible dispatch time.
    pub scheduled_at: DateTime<Utc>,
    /// Creation time, the FIFO key.
    pub created_at: DateTime<Utc>,
    /// Start of the current or last attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Last failure message.
    pub error_message: Option<String>,
}

/// A job to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    /// Job type tag.
    pub kind: JobKind,
    /// Subjects.
    pub payload: JobPayload,
    /// Attempts allowed.
    pub max_attempts: u32,
    /// Earliest eligible dispatch time.
    pub scheduled_at: DateTime<Utc>,
}

/// Fields to change on a job row. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    /// New status.
    pub status: Option<JobStatus>,
    /// New attempt count.
    pub attempts: Option<u32>,
    /// New earliest dispatch time.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// New start time (`Some(None)` clears it).
    pub started_at: Option<Option<DateTime<Utc>>>,
    /// New completion time.
    pub completed_at: Option<DateTime<Utc>>,
    /// New error message (`Some(None)` clears it).
    pub error_message: Option<Option<String>>,
}

impl JobPatch {
    /// Applies the patch to an in-memory job.
    pub fn apply(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(attempts) = self.attempts {
            job.attempts = attempts;
        }
        if let Some(at) = self.scheduled_at {
            job.scheduled_at = at;
        }
        if let Some(at) = self.started_at {
            job.started_at = at;
        }
        if let Some(at) = self.completed_at {
            job.completed_at = Some(at);
        }
        if let Some(ref message) = self.error_message {
            job.error_message.clone_from(message);
        }
    }
}

/// Job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Waiting jobs.
    pub pending: u64,
    /// Claimed jobs.
    pub processing: u64,
    /// Finished jobs.
    pub completed: u64,
    /// Failed jobs.
    pub failed: u64,
    /// All jobs.
    pub total: u64,
}

impl QueueStats {
    /// Adds `count` jobs in `status`.
    pub fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
        }
        self.total += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_routes_to_provider() {
        assert_eq!(JobKind::FetchRelated.provider(), Provider::SearchAd);
        assert_eq!(JobKind::CountDocs.operation_class(), OperationClass::Docs);
    }

    #[test]
    fn test_payload_json() {
        let payload = JobPayload::new(vec![3, 1, 2]);
        let raw = payload.to_json().unwrap();
        assert_eq!(raw, r#"{"keyword_ids":[3,1,2]}"#);
        assert_eq!(JobPayload::from_json(&raw).unwrap(), payload);
    }

    #[test]
    fn test_queue_stats_add() {
        let mut stats = QueueStats::default();
        stats.add(JobStatus::Pending, 2);
        stats.add(JobStatus::Failed, 1);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total, 3);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
