//! Trait definitions for kwharvest.
//!
//! The admission and scheduling core talks to two kinds of collaborators:
//! a durable record store (credentials, jobs, keywords) and the two
//! upstream APIs. Both are expressed as object-safe async traits so the
//! core can be wired against SQLite, an in-memory store, or test fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::{CoreError, UpstreamError};
use crate::models::{
    Credential, CredentialFilter, CredentialGuard, CredentialPatch, DocCountRecord, DocCounts,
    Job, JobPatch, JobStatus, Keyword, KeywordPage, KeywordQuery, KeywordStatus, NewCredential,
    NewJob, NewKeyword, RelatedKeyword,
};

// ============================================================================
// Record Store
// ============================================================================

/// Durable credential table.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Lists credentials matching the filter, ordered by id.
    async fn get_credentials(&self, filter: CredentialFilter)
    -> Result<Vec<Credential>, CoreError>;

    /// Fetches one credential.
    async fn get_credential(&self, id: i64) -> Result<Option<Credential>, CoreError>;

    /// Applies `patch` to a credential if the stored row satisfies `guard`.
    ///
    /// Returns `Ok(false)` when the guard did not match or the row does not
    /// exist. The check and the write happen as one atomic single-row update.
    async fn update_credential(
        &self,
        id: i64,
        guard: &CredentialGuard,
        patch: &CredentialPatch,
    ) -> Result<bool, CoreError>;

    /// Inserts a credential, or refreshes key material and limits of the row
    /// with the same `(provider, label)`. Counters of existing rows are kept.
    async fn upsert_credential(
        &self,
        credential: &NewCredential,
        initial_tokens: f64,
        now: DateTime<Utc>,
    ) -> Result<Credential, CoreError>;
}

/// Durable job table.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a pending job and returns its id.
    async fn insert_job(&self, job: &NewJob, now: DateTime<Utc>) -> Result<i64, CoreError>;

    /// Atomically claims the oldest pending job with `scheduled_at <= now`.
    ///
    /// The claimed job is `processing` with `started_at = now`. Concurrent
    /// callers never receive the same job.
    async fn claim_oldest_eligible_job(&self, now: DateTime<Utc>)
    -> Result<Option<Job>, CoreError>;

    /// Applies `patch` if the stored status equals `expected` (when given).
    async fn update_job(
        &self,
        id: i64,
        expected: Option<JobStatus>,
        patch: &JobPatch,
    ) -> Result<bool, CoreError>;

    /// Fetches one job.
    async fn get_job(&self, id: i64) -> Result<Option<Job>, CoreError>;

    /// Counts jobs per status.
    async fn count_jobs_by_status(&self) -> Result<HashMap<JobStatus, u64>, CoreError>;

    /// Returns `processing` jobs started before `started_before` to `pending`.
    async fn requeue_stale_jobs(
        &self,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError>;
}

/// Durable keyword and result tables.
#[async_trait]
pub trait KeywordStore: Send + Sync {
    /// Inserts a keyword. A duplicate term is a [`CoreError::Conflict`].
    async fn insert_keyword(
        &self,
        keyword: &NewKeyword,
        now: DateTime<Utc>,
    ) -> Result<Keyword, CoreError>;

    /// Inserts unknown terms and refreshes metrics of known ones.
    ///
    /// Known terms keep their status, parent and depth. Returns the number
    /// of newly inserted keywords.
    async fn upsert_related(
        &self,
        keywords: &[NewKeyword],
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError>;

    /// Fetches keywords by id, in id order. Unknown ids are skipped.
    async fn get_keywords(&self, ids: &[i64]) -> Result<Vec<Keyword>, CoreError>;

    /// Looks a keyword up by its normalized term.
    async fn find_keyword(&self, term: &str) -> Result<Option<Keyword>, CoreError>;

    /// Oldest keywords in `status`, at most `limit`.
    async fn keywords_by_status(
        &self,
        status: KeywordStatus,
        limit: usize,
    ) -> Result<Vec<Keyword>, CoreError>;

    /// Moves keywords to `status`. Returns the number of rows changed.
    async fn set_keyword_status(
        &self,
        ids: &[i64],
        status: KeywordStatus,
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError>;

    /// Stores document counts, replacing the row for the same keyword and date.
    async fn save_doc_counts(
        &self,
        record: &DocCountRecord,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError>;

    /// All stored document counts for a keyword, newest first.
    async fn doc_counts_for(&self, keyword_id: i64) -> Result<Vec<DocCountRecord>, CoreError>;

    /// Counts keywords per status.
    async fn count_keywords_by_status(&self)
    -> Result<HashMap<KeywordStatus, u64>, CoreError>;

    /// Keywords joined with their latest document counts, filtered and
    /// sorted as `query` asks, one page at a time.
    async fn list_keywords(&self, query: &KeywordQuery) -> Result<KeywordPage, CoreError>;
}

/// Everything the core needs from durable storage.
pub trait RecordStore: CredentialStore + JobStore + KeywordStore {}

impl<T: CredentialStore + JobStore + KeywordStore + ?Sized> RecordStore for T {}

// ============================================================================
// Upstream APIs
// ============================================================================

/// Related-keyword lookup (search-ad provider).
///
/// One call consumes one token regardless of how many hints it carries.
#[async_trait]
pub trait RelatedKeywordsApi: Send + Sync {
    /// Returns normalized related keywords for up to five hint terms.
    async fn related_keywords(
        &self,
        credential: &Credential,
        hints: &[String],
    ) -> Result<Vec<RelatedKeyword>, UpstreamError>;
}

/// Per-section document counts (open-API provider).
#[async_trait]
pub trait DocCountApi: Send + Sync {
    /// Returns blog/cafe/web/news totals for one term.
    async fn doc_counts(
        &self,
        credential: &Credential,
        term: &str,
    ) -> Result<DocCounts, UpstreamError>;
}
