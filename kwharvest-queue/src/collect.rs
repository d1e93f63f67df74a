//! Collection trigger and seeding.

use kwharvest_core::{Clock, CoreError, JobKind, Keyword, KeywordStatus, NewKeyword, RecordStore};
use kwharvest_fetch::CredentialManager;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::QueueError;
use crate::scheduler::Scheduler;

/// Keywords picked up by one `fetch_related` collection by default.
pub const DEFAULT_RELATED_LIMIT: usize = 300;

/// Keywords picked up by one `count_docs` collection by default.
pub const DEFAULT_DOCS_LIMIT: usize = 800;

/// Keyword status a job kind consumes.
pub fn input_status(kind: JobKind) -> KeywordStatus {
    match kind {
        JobKind::FetchRelated => KeywordStatus::Queued,
        JobKind::CountDocs => KeywordStatus::FetchedRel,
    }
}

/// Default collection size for a job kind.
pub fn default_limit(kind: JobKind) -> usize {
    match kind {
        JobKind::FetchRelated => DEFAULT_RELATED_LIMIT,
        JobKind::CountDocs => DEFAULT_DOCS_LIMIT,
    }
}

/// Result of one collection trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectReport {
    /// Job kind enqueued.
    pub kind: JobKind,
    /// Keywords picked up.
    pub keywords: usize,
    /// Ids of the enqueued jobs.
    pub job_ids: Vec<i64>,
}

/// Turns waiting keywords into jobs.
pub struct Collector {
    store: Arc<dyn RecordStore>,
    credentials: Arc<CredentialManager>,
    scheduler: Arc<Scheduler>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Collector {
    /// Creates a collector.
    pub fn new(
        store: Arc<dyn RecordStore>,
        credentials: Arc<CredentialManager>,
        scheduler: Arc<Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            credentials,
            scheduler,
            clock,
        }
    }

    /// Enqueues up to `limit` keywords waiting for `kind`.
    ///
    /// Refuses with [`QueueError::NoUsableCredential`] when no credential of
    /// the matching provider could serve a call right now.
    pub async fn collect(
        &self,
        kind: JobKind,
        limit: Option<usize>,
    ) -> Result<CollectReport, QueueError> {
        let provider = kind.provider();
        if !self.credentials.has_usable(provider).await? {
            return Err(QueueError::NoUsableCredential(provider));
        }

        let limit = limit.unwrap_or_else(|| default_limit(kind));
        let keywords = self
            .store
            .keywords_by_status(input_status(kind), limit)
            .await?;
        if keywords.is_empty() {
            debug!(kind = %kind, "Nothing to collect");
            return Ok(CollectReport {
                kind,
                keywords: 0,
                job_ids: Vec::new(),
            });
        }

        let ids: Vec<i64> = keywords.iter().map(|k| k.id).collect();
        let job_ids = self.scheduler.enqueue_batch(kind, &ids, None).await?;
        info!(kind = %kind, keywords = ids.len(), jobs = job_ids.len(), "Collection enqueued");

        Ok(CollectReport {
            kind,
            keywords: ids.len(),
            job_ids,
        })
    }

    /// Registers a seed keyword at depth 0, queued for a related fetch.
    pub async fn seed(&self, term: &str) -> Result<Keyword, QueueError> {
        let seed = NewKeyword::seed(term);
        if seed.term.is_empty() {
            return Err(QueueError::EmptyKeyword);
        }

        match self.store.insert_keyword(&seed, self.clock.now()).await {
            Ok(keyword) => {
                info!(id = keyword.id, term = %keyword.term, "Seed keyword added");
                Ok(keyword)
            }
            Err(CoreError::Conflict(_)) => Err(QueueError::DuplicateKeyword(seed.term)),
            Err(e) => Err(e.into()),
        }
    }
}
