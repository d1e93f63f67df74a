//! Job handlers.
//!
//! The set of job kinds is closed: [`FetchRelatedHandler`] and
//! [`CountDocsHandler`] both implement [`JobHandler`], and [`Handlers`]
//! picks one by the job's kind tag. Every upstream call goes through the
//! shared [`UpstreamCaller`], so admission, credential bookkeeping and
//! per-call retries happen below the handler.

use async_trait::async_trait;
use futures::{StreamExt, stream};
use kwharvest_core::{
    Clock, DocCountApi, DocCountRecord, Job, JobKind, Keyword, KeywordSource, KeywordStatus,
    NewKeyword, OperationClass, Provider, RecordStore, RelatedKeyword, RelatedKeywordsApi,
};
use kwharvest_fetch::UpstreamCaller;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::QueueError;

/// Most keywords one related-keyword call accepts.
pub const RELATED_BATCH_LIMIT: usize = 5;

/// Most keywords one document-count job may carry.
pub const DOCS_BATCH_LIMIT: usize = 100;

/// Default number of concurrent document-count calls per job.
pub const DEFAULT_DOCS_CONCURRENCY: usize = 5;

/// Largest payload a job of `kind` may carry.
pub fn batch_limit(kind: JobKind) -> usize {
    match kind {
        JobKind::FetchRelated => RELATED_BATCH_LIMIT,
        JobKind::CountDocs => DOCS_BATCH_LIMIT,
    }
}

/// Checks a payload against the batch contract of `kind`.
pub fn validate_payload(kind: JobKind, keyword_ids: &[i64]) -> Result<(), QueueError> {
    if keyword_ids.is_empty() {
        return Err(QueueError::invalid_payload(kind, "no keyword ids"));
    }
    let limit = batch_limit(kind);
    if keyword_ids.len() > limit {
        return Err(QueueError::invalid_payload(
            kind,
            format!("{} keywords, at most {limit}", keyword_ids.len()),
        ));
    }
    Ok(())
}

// ============================================================================
// Handler Trait
// ============================================================================

/// What a handler did with one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOutcome {
    /// Keywords from the payload that were processed.
    pub processed: usize,
    /// Keywords from the payload skipped because of their status.
    pub skipped: usize,
    /// Rows written (new related keywords or document-count rows).
    pub stored: u64,
}

/// Executes the payload of one job kind.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job kind this handler serves.
    fn kind(&self) -> JobKind;

    /// Handles one claimed job. An error makes the scheduler retry or fail it.
    async fn handle(&self, job: &Job) -> Result<JobOutcome, QueueError>;
}

/// Shared collaborators of both handlers.
#[derive(Clone)]
pub struct HandlerContext {
    /// Keyword and result storage.
    pub store: Arc<dyn RecordStore>,
    /// Admitted, retrying upstream access.
    pub caller: Arc<UpstreamCaller>,
    /// Time source for stored timestamps and dates.
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("caller", &self.caller)
            .finish_non_exhaustive()
    }
}

impl HandlerContext {
    /// Loads the payload's keywords, split by whether they are in `wanted` status.
    async fn load(
        &self,
        job: &Job,
        wanted: KeywordStatus,
    ) -> Result<(Vec<Keyword>, usize), QueueError> {
        validate_payload(job.kind, &job.payload.keyword_ids)?;
        let keywords = self.store.get_keywords(&job.payload.keyword_ids).await?;
        let missing: Vec<i64> = job
            .payload
            .keyword_ids
            .iter()
            .copied()
            .filter(|id| !keywords.iter().any(|k| k.id == *id))
            .collect();
        if !missing.is_empty() {
            return Err(QueueError::invalid_payload(
                job.kind,
                format!("unknown keyword ids {missing:?}"),
            ));
        }

        let total = keywords.len();
        let ready: Vec<Keyword> = keywords.into_iter().filter(|k| k.status == wanted).collect();
        let skipped = total.saturating_sub(ready.len());
        if skipped > 0 {
            debug!(job_id = job.id, skipped, "Skipping keywords not in {wanted}");
        }
        Ok((ready, skipped))
    }
}

// ============================================================================
// Fetch Related
// ============================================================================

/// Fetches related keywords for queued keywords and stores them as children.
pub struct FetchRelatedHandler {
    ctx: HandlerContext,
    api: Arc<dyn RelatedKeywordsApi>,
}

impl FetchRelatedHandler {
    /// Creates the handler.
    pub fn new(ctx: HandlerContext, api: Arc<dyn RelatedKeywordsApi>) -> Self {
        Self { ctx, api }
    }

    /// Stores one group's results under the group's first keyword.
    async fn store_group(
        &self,
        group: &[Keyword],
        related: Vec<RelatedKeyword>,
    ) -> Result<u64, QueueError> {
        let Some(parent) = group.first() else {
            return Ok(0);
        };
        let now = self.ctx.clock.now();

        let children: Vec<NewKeyword> = related
            .into_iter()
            .map(|r| NewKeyword {
                term: r.term,
                parent_id: Some(parent.id),
                depth: parent.depth + 1,
                source: KeywordSource::Related,
                status: KeywordStatus::FetchedRel,
                metrics: Some(r.metrics),
            })
            .collect();
        let inserted = self.ctx.store.upsert_related(&children, now).await?;

        let ids: Vec<i64> = group.iter().map(|k| k.id).collect();
        self.ctx
            .store
            .set_keyword_status(&ids, KeywordStatus::FetchedRel, now)
            .await?;
        Ok(inserted)
    }
}

impl std::fmt::Debug for FetchRelatedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchRelatedHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl JobHandler for FetchRelatedHandler {
    fn kind(&self) -> JobKind {
        JobKind::FetchRelated
    }

    #[instrument(skip(self, job), fields(job_id = job.id))]
    async fn handle(&self, job: &Job) -> Result<JobOutcome, QueueError> {
        let (keywords, skipped) = self.ctx.load(job, KeywordStatus::Queued).await?;
        let mut outcome = JobOutcome {
            skipped,
            ..JobOutcome::default()
        };

        for group in keywords.chunks(RELATED_BATCH_LIMIT) {
            let hints: Vec<String> = group.iter().map(|k| k.term.clone()).collect();
            let api = Arc::clone(&self.api);
            let related = self
                .ctx
                .caller
                .call(Provider::SearchAd, OperationClass::Related, move |credential| {
                    let api = Arc::clone(&api);
                    let hints = hints.clone();
                    async move { api.related_keywords(&credential, &hints).await }
                })
                .await?;

            let found = related.len();
            let inserted = self.store_group(group, related).await?;
            debug!(group = group.len(), found, inserted, "Stored related keywords");
            outcome.processed += group.len();
            outcome.stored += inserted;
        }

        info!(
            processed = outcome.processed,
            inserted = outcome.stored,
            "Related keyword job done"
        );
        Ok(outcome)
    }
}

// ============================================================================
// Count Docs
// ============================================================================

/// Counts documents per section for keywords whose related keywords are in.
pub struct CountDocsHandler {
    ctx: HandlerContext,
    api: Arc<dyn DocCountApi>,
    concurrency: usize,
}

impl CountDocsHandler {
    /// Creates the handler with the default concurrency.
    pub fn new(ctx: HandlerContext, api: Arc<dyn DocCountApi>) -> Self {
        Self {
            ctx,
            api,
            concurrency: DEFAULT_DOCS_CONCURRENCY,
        }
    }

    /// Sets how many keywords are counted at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Counts and stores one keyword.
    async fn count_one(&self, keyword: &Keyword) -> Result<(), QueueError> {
        let api = Arc::clone(&self.api);
        let term = keyword.term.clone();
        let counts = self
            .ctx
            .caller
            .call(Provider::OpenApi, OperationClass::Docs, move |credential| {
                let api = Arc::clone(&api);
                let term = term.clone();
                async move { api.doc_counts(&credential, &term).await }
            })
            .await?;

        let now = self.ctx.clock.now();
        let record = DocCountRecord {
            keyword_id: keyword.id,
            date: now.date_naive(),
            counts,
        };
        self.ctx.store.save_doc_counts(&record, now).await?;
        self.ctx
            .store
            .set_keyword_status(&[keyword.id], KeywordStatus::CountedDocs, now)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for CountDocsHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountDocsHandler")
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl JobHandler for CountDocsHandler {
    fn kind(&self) -> JobKind {
        JobKind::CountDocs
    }

    /// Counted keywords are stored as they finish, so a retried job only
    /// repeats the keywords that were not counted. The first failure ends the
    /// attempt and drops the calls still in flight.
    #[instrument(skip(self, job), fields(job_id = job.id))]
    async fn handle(&self, job: &Job) -> Result<JobOutcome, QueueError> {
        let (keywords, skipped) = self.ctx.load(job, KeywordStatus::FetchedRel).await?;

        let mut counted = stream::iter(keywords.iter().cloned())
            .map(|keyword| async move { self.count_one(&keyword).await })
            .buffer_unordered(self.concurrency);

        let mut stored = 0;
        while let Some(result) = counted.next().await {
            if let Err(e) = result {
                warn!(error = %e, counted = stored, "Document count failed, abandoning attempt");
                return Err(e);
            }
            stored += 1;
        }

        info!(counted = stored, "Document count job done");
        Ok(JobOutcome {
            processed: keywords.len(),
            skipped,
            stored,
        })
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// The closed set of job handlers, selected by job kind.
#[derive(Debug)]
pub struct Handlers {
    fetch_related: FetchRelatedHandler,
    count_docs: CountDocsHandler,
}

impl Handlers {
    /// Bundles both handlers.
    pub fn new(fetch_related: FetchRelatedHandler, count_docs: CountDocsHandler) -> Self {
        Self {
            fetch_related,
            count_docs,
        }
    }

    /// The handler for `kind`.
    pub fn for_kind(&self, kind: JobKind) -> &dyn JobHandler {
        match kind {
            JobKind::FetchRelated => &self.fetch_related,
            JobKind::CountDocs => &self.count_docs,
        }
    }

    /// Runs `job` through its handler.
    pub async fn dispatch(&self, job: &Job) -> Result<JobOutcome, QueueError> {
        self.for_kind(job.kind).handle(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_payload() {
        assert!(validate_payload(JobKind::FetchRelated, &[1, 2, 3, 4, 5]).is_ok());
        assert!(validate_payload(JobKind::FetchRelated, &[1, 2, 3, 4, 5, 6]).is_err());
        assert!(validate_payload(JobKind::CountDocs, &[]).is_err());

        let ids: Vec<i64> = (1..=100).collect();
        assert!(validate_payload(JobKind::CountDocs, &ids).is_ok());
    }

    #[test]
    fn test_batch_limits() {
        assert_eq!(batch_limit(JobKind::FetchRelated), 5);
        assert_eq!(batch_limit(JobKind::CountDocs), 100);
    }
}
