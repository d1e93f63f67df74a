//! Scheduler, handler and collector tests against the in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::future::join_all;
use kwharvest_core::{
    Clock, Credential, CredentialStatus, CredentialStore, DocCountApi, DocCounts, JobKind,
    JobPayload, JobStatus, JobStore, KeywordMetrics, KeywordStatus, KeywordStore, ManualClock,
    NewCredential, NewJob, Provider, RelatedKeyword, RelatedKeywordsApi, UpstreamError,
};
use kwharvest_fetch::{
    AdmissionController, CredentialManager, CredentialSettings, RetryStrategy, UpstreamCaller,
};
use kwharvest_queue::{
    Collector, CountDocsHandler, FetchRelatedHandler, HandlerContext, Handlers, ProcessOutcome,
    QueueError, Scheduler, SchedulerSettings,
};
use kwharvest_store::MemoryStore;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// Fakes
// ============================================================================

/// Related-keyword API answering from a script, then with `<hint> review`.
#[derive(Default)]
struct FakeRelated {
    script: Mutex<VecDeque<Result<Vec<RelatedKeyword>, UpstreamError>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeRelated {
    fn fail_next(&self, error: UpstreamError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelatedKeywordsApi for FakeRelated {
    async fn related_keywords(
        &self,
        _credential: &Credential,
        hints: &[String],
    ) -> Result<Vec<RelatedKeyword>, UpstreamError> {
        self.calls.lock().unwrap().push(hints.to_vec());
        let scripted = self.script.lock().unwrap().pop_front();
        if let Some(result) = scripted {
            return result;
        }
        Ok(hints
            .iter()
            .map(|hint| RelatedKeyword {
                term: format!("{hint} review"),
                metrics: KeywordMetrics {
                    pc: 120,
                    mobile: 340,
                    ..KeywordMetrics::default()
                },
            })
            .collect())
    }
}

/// Document-count API failing once for selected terms or from a script.
#[derive(Default)]
struct FakeDocs {
    fail_once: Mutex<HashSet<String>>,
    script: Mutex<VecDeque<UpstreamError>>,
    calls: AtomicUsize,
}

impl FakeDocs {
    fn fail_next(&self, error: UpstreamError) {
        self.script.lock().unwrap().push_back(error);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocCountApi for FakeDocs {
    async fn doc_counts(
        &self,
        _credential: &Credential,
        term: &str,
    ) -> Result<DocCounts, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        if let Some(error) = scripted {
            return Err(error);
        }
        if self.fail_once.lock().unwrap().remove(term) {
            return Err(UpstreamError::status(503, "unavailable"));
        }
        Ok(DocCounts {
            blog: 10,
            cafe: 20,
            web: 30,
            news: u64::try_from(term.len()).unwrap(),
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

fn searchad(label: &str) -> NewCredential {
    NewCredential {
        provider: Provider::SearchAd,
        label: label.to_string(),
        key_id: "license".to_string(),
        key_secret: "secret".to_string(),
        customer_id: Some("1234".to_string()),
        qps_limit: 0.5,
        daily_quota: 8_000,
    }
}

fn openapi(label: &str) -> NewCredential {
    NewCredential {
        provider: Provider::OpenApi,
        label: label.to_string(),
        key_id: "client".to_string(),
        key_secret: "secret".to_string(),
        customer_id: None,
        qps_limit: 3.0,
        daily_quota: 20_000,
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    credentials: Arc<CredentialManager>,
    scheduler: Arc<Scheduler>,
    collector: Collector,
    related: Arc<FakeRelated>,
    docs: Arc<FakeDocs>,
}

impl Harness {
    async fn new(credentials: &[NewCredential], settings: SchedulerSettings) -> Self {
        Self::with_docs_concurrency(credentials, settings, 1).await
    }

    async fn with_docs_concurrency(
        credentials: &[NewCredential],
        settings: SchedulerSettings,
        docs_concurrency: usize,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let manager = Arc::new(CredentialManager::new(
            store.clone(),
            clock.clone(),
            CredentialSettings::default(),
        ));
        manager.sync_credentials(credentials).await.unwrap();

        let admission = Arc::new(AdmissionController::new(Arc::clone(&manager)));
        let caller = Arc::new(UpstreamCaller::new(admission, RetryStrategy::no_retry()));
        let related = Arc::new(FakeRelated::default());
        let docs = Arc::new(FakeDocs::default());

        let ctx = HandlerContext {
            store: store.clone(),
            caller,
            clock: clock.clone(),
        };
        let handlers = Handlers::new(
            FetchRelatedHandler::new(ctx.clone(), related.clone()),
            CountDocsHandler::new(ctx, docs.clone()).with_concurrency(docs_concurrency),
        );
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            handlers,
            clock.clone(),
            settings,
        ));
        let collector = Collector::new(
            store.clone(),
            Arc::clone(&manager),
            Arc::clone(&scheduler),
            clock.clone(),
        );

        Self {
            store,
            clock,
            credentials: manager,
            scheduler,
            collector,
            related,
            docs,
        }
    }

    async fn seed_all(&self, terms: &[&str]) -> Vec<i64> {
        let mut ids = Vec::new();
        for term in terms {
            ids.push(self.collector.seed(term).await.unwrap().id);
        }
        ids
    }

    /// Lets cooldowns expire and tops the buckets up.
    async fn pass_time(&self, seconds: i64) {
        self.clock.advance(Duration::seconds(seconds));
        self.credentials.reactivate_expired_cooldowns().await.unwrap();
        self.credentials.refill().await.unwrap();
    }

    async fn job(&self, id: i64) -> kwharvest_core::Job {
        self.store.get_job(id).await.unwrap().unwrap()
    }
}

// ============================================================================
// Enqueueing
// ============================================================================

#[tokio::test]
async fn test_enqueue_batch_splits_by_kind() {
    let h = Harness::new(&[], SchedulerSettings::default()).await;

    let ids: Vec<i64> = (1..=12).collect();
    let related = h
        .scheduler
        .enqueue_batch(JobKind::FetchRelated, &ids, None)
        .await
        .unwrap();
    assert_eq!(related.len(), 3);

    let docs = h
        .scheduler
        .enqueue_batch(JobKind::CountDocs, &ids, None)
        .await
        .unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(h.job(docs[0]).await.payload.keyword_ids.len(), 10);
    assert_eq!(h.job(docs[1]).await.payload.keyword_ids, vec![11, 12]);

    let stats = h.scheduler.get_queue_stats().await.unwrap();
    assert_eq!(stats.pending, 5);
    assert_eq!(stats.total, 5);
}

#[tokio::test]
async fn test_enqueue_batch_drops_duplicates_and_checks_size() {
    let h = Harness::new(&[], SchedulerSettings::default()).await;

    let jobs = h
        .scheduler
        .enqueue_batch(JobKind::FetchRelated, &[4, 4, 5, 4], Some(2))
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(h.job(jobs[0]).await.payload.keyword_ids, vec![4, 5]);

    let err = h
        .scheduler
        .enqueue_batch(JobKind::FetchRelated, &[1], Some(6))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidPayload { .. }));

    let err = h
        .scheduler
        .enqueue(JobKind::CountDocs, JobPayload::new(Vec::new()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidPayload { .. }));
}

// ============================================================================
// Claiming
// ============================================================================

#[tokio::test]
async fn test_at_most_one_claim() {
    let h = Harness::new(&[], SchedulerSettings::default()).await;
    let job_id = h
        .scheduler
        .enqueue(JobKind::CountDocs, JobPayload::new(vec![1]), None)
        .await
        .unwrap();

    let claims = join_all((0..8).map(|_| h.scheduler.claim_next())).await;
    let claimed: Vec<_> = claims.into_iter().filter_map(|c| c.unwrap()).collect();

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, job_id);
    assert_eq!(claimed[0].status, JobStatus::Processing);
    assert_eq!(claimed[0].started_at, Some(t0()));
}

#[tokio::test]
async fn test_claim_respects_schedule_and_fifo() {
    let h = Harness::new(&[], SchedulerSettings::default()).await;
    let later = h
        .scheduler
        .enqueue(
            JobKind::CountDocs,
            JobPayload::new(vec![1]),
            Some(t0() + Duration::seconds(30)),
        )
        .await
        .unwrap();
    h.clock.advance(Duration::seconds(1));
    let first = h
        .scheduler
        .enqueue(JobKind::CountDocs, JobPayload::new(vec![2]), None)
        .await
        .unwrap();
    h.clock.advance(Duration::seconds(1));
    let second = h
        .scheduler
        .enqueue(JobKind::CountDocs, JobPayload::new(vec![3]), None)
        .await
        .unwrap();

    assert_eq!(h.scheduler.claim_next().await.unwrap().unwrap().id, first);
    assert_eq!(h.scheduler.claim_next().await.unwrap().unwrap().id, second);
    assert!(h.scheduler.claim_next().await.unwrap().is_none());

    h.clock.advance(Duration::seconds(30));
    assert_eq!(h.scheduler.claim_next().await.unwrap().unwrap().id, later);
}

// ============================================================================
// Failure Handling
// ============================================================================

#[tokio::test]
async fn test_backoff_growth_until_failed() {
    let settings = SchedulerSettings {
        default_max_attempts: 5,
        max_delay: std::time::Duration::from_secs(4),
        ..SchedulerSettings::default()
    };
    let h = Harness::new(&[], settings).await;
    let keyword_ids = h.seed_all(&["tent", "stove"]).await;
    let job_id = h
        .scheduler
        .enqueue(JobKind::FetchRelated, JobPayload::new(keyword_ids.clone()), None)
        .await
        .unwrap();

    let mut deltas = Vec::new();
    loop {
        let job = h.scheduler.claim_next().await.unwrap().unwrap();
        let now = h.clock.now();
        let retry = h.scheduler.on_job_failure(&job, "boom").await.unwrap();
        let stored = h.job(job_id).await;
        if !retry {
            assert_eq!(stored.status, JobStatus::Failed);
            assert_eq!(stored.attempts, stored.max_attempts);
            assert_eq!(stored.error_message.as_deref(), Some("boom"));
            break;
        }
        assert_eq!(stored.status, JobStatus::Pending);
        deltas.push((stored.scheduled_at - now).num_seconds());
        h.clock.set(stored.scheduled_at);
    }

    assert_eq!(deltas, vec![1, 2, 4, 4]);
    assert!(deltas.windows(2).all(|w| w[0] <= w[1]));

    for keyword in h.store.get_keywords(&keyword_ids).await.unwrap() {
        assert_eq!(keyword.status, KeywordStatus::Error);
    }
    assert!(h.scheduler.claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_round_trip_rate_limited_twice_then_completed() {
    let h = Harness::new(&[searchad("main")], SchedulerSettings::default()).await;
    let keyword_ids = h.seed_all(&["tent", "stove", "lantern"]).await;
    let job_id = h
        .scheduler
        .enqueue(JobKind::FetchRelated, JobPayload::new(keyword_ids.clone()), None)
        .await
        .unwrap();
    h.related.fail_next(UpstreamError::status(429, "slow down"));
    h.related.fail_next(UpstreamError::status(429, "slow down"));

    let first = h.scheduler.process_next().await.unwrap();
    assert!(matches!(first, ProcessOutcome::Retrying { attempts: 1, .. }));
    let credential = h.store.get_credential(1).await.unwrap().unwrap();
    assert_eq!(credential.status, CredentialStatus::Cooling);

    h.pass_time(301).await;
    let second = h.scheduler.process_next().await.unwrap();
    assert!(matches!(second, ProcessOutcome::Retrying { attempts: 2, .. }));

    h.pass_time(301).await;
    let third = h.scheduler.process_next().await.unwrap();
    assert!(matches!(third, ProcessOutcome::Completed { job_id: id, .. } if id == job_id));

    let job = h.job(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
    assert!(job.error_message.is_none());
    assert_eq!(h.related.calls().len(), 3);

    let credential = h.store.get_credential(1).await.unwrap().unwrap();
    assert_eq!(credential.used_today, 1);
    assert_eq!(credential.status, CredentialStatus::Active);

    for keyword in h.store.get_keywords(&keyword_ids).await.unwrap() {
        assert_eq!(keyword.status, KeywordStatus::FetchedRel);
    }
    let child = h.store.find_keyword("tent review").await.unwrap().unwrap();
    assert_eq!(child.parent_id, Some(keyword_ids[0]));
    assert_eq!(child.depth, 1);
    assert_eq!(child.status, KeywordStatus::FetchedRel);
    assert_eq!(child.metrics.map(|m| m.total_volume()), Some(460));

    let stats = h.scheduler.get_processing_stats();
    assert_eq!(stats.related.processed, 1);
    assert_eq!(stats.related.failed, 2);
}

#[tokio::test]
async fn test_auth_rejection_disables_and_counts_attempt() {
    let h = Harness::new(&[searchad("main")], SchedulerSettings::default()).await;
    let keyword_ids = h.seed_all(&["tent"]).await;
    let job_id = h
        .scheduler
        .enqueue(JobKind::FetchRelated, JobPayload::new(keyword_ids), None)
        .await
        .unwrap();
    h.related.fail_next(UpstreamError::status(401, "invalid signature"));

    let outcome = h.scheduler.process_next().await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Retrying { attempts: 1, .. }));
    assert_eq!(h.related.calls().len(), 1);

    let credential = h.store.get_credential(1).await.unwrap().unwrap();
    assert_eq!(credential.status, CredentialStatus::Disabled);
    assert!(h.job(job_id).await.error_message.unwrap().contains("401"));
}

#[tokio::test]
async fn test_invalid_payload_fails_without_retry() {
    let h = Harness::new(&[searchad("main")], SchedulerSettings::default()).await;
    let job_id = h
        .store
        .insert_job(
            &NewJob {
                kind: JobKind::FetchRelated,
                payload: JobPayload::new(vec![1, 2, 3, 4, 5, 6]),
                max_attempts: 3,
                scheduled_at: t0(),
            },
            t0(),
        )
        .await
        .unwrap();

    let outcome = h.scheduler.process_next().await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Failed { .. }));
    assert_eq!(h.job(job_id).await.status, JobStatus::Failed);
    assert!(h.related.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_keyword_ids_fail_without_retry() {
    let h = Harness::new(&[openapi("main")], SchedulerSettings::default()).await;
    let ids = h.seed_all(&["tent"]).await;
    h.store
        .set_keyword_status(&ids, KeywordStatus::FetchedRel, t0())
        .await
        .unwrap();
    let job_id = h
        .scheduler
        .enqueue(JobKind::CountDocs, JobPayload::new(vec![ids[0], 999]), None)
        .await
        .unwrap();

    let outcome = h.scheduler.process_next().await.unwrap();
    let ProcessOutcome::Failed { error, .. } = outcome else {
        panic!("expected the job to fail");
    };
    assert!(error.contains("unknown keyword ids [999]"));

    let job = h.job(job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, job.max_attempts);
    assert_eq!(h.docs.calls(), 0);
}

#[tokio::test]
async fn test_failure_after_another_worker_requeued_is_ignored() {
    let h = Harness::new(&[], SchedulerSettings::default()).await;
    let ids = h.seed_all(&["tent"]).await;
    let job_id = h
        .scheduler
        .enqueue(JobKind::FetchRelated, JobPayload::new(ids.clone()), None)
        .await
        .unwrap();
    let claimed = h.scheduler.claim_next().await.unwrap().unwrap();

    h.clock.advance(Duration::minutes(11));
    assert_eq!(h.scheduler.requeue_stale().await.unwrap(), 1);

    let retry = h.scheduler.on_job_failure(&claimed, "late").await.unwrap();
    assert!(!retry);
    let job = h.job(job_id).await;
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert!(job.error_message.is_none());
    assert_eq!(job.scheduled_at, h.clock.now());

    // A lost terminal failure leaves the keywords alone too.
    let last_attempt = kwharvest_core::Job {
        attempts: claimed.max_attempts - 1,
        ..claimed
    };
    assert!(!h.scheduler.on_job_failure(&last_attempt, "late").await.unwrap());
    assert_eq!(h.job(job_id).await.status, JobStatus::Pending);
    let keyword = &h.store.get_keywords(&ids).await.unwrap()[0];
    assert_eq!(keyword.status, KeywordStatus::Queued);
}

// ============================================================================
// Document Counts
// ============================================================================

#[tokio::test]
async fn test_count_docs_retry_repeats_only_uncounted_keywords() {
    let h = Harness::new(&[openapi("main")], SchedulerSettings::default()).await;
    let ids = h.seed_all(&["tent", "stove", "lantern"]).await;
    h.store
        .set_keyword_status(&ids, KeywordStatus::FetchedRel, t0())
        .await
        .unwrap();
    h.docs.fail_once.lock().unwrap().insert("stove".to_string());

    let jobs = h
        .scheduler
        .enqueue_batch(JobKind::CountDocs, &ids, None)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);

    // "tent" is counted, "stove" fails and "lantern" is never tried.
    let outcome = h.scheduler.process_next().await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Retrying { .. }));
    assert_eq!(h.docs.calls(), 2);

    h.pass_time(2).await;
    let completed = h.scheduler.process_next().await.unwrap();
    let ProcessOutcome::Completed { outcome, .. } = completed else {
        panic!("expected the job to complete");
    };
    assert_eq!(outcome.processed, 2);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(h.docs.calls(), 4);

    for keyword in h.store.get_keywords(&ids).await.unwrap() {
        assert_eq!(keyword.status, KeywordStatus::CountedDocs);
        let rows = h.store.doc_counts_for(keyword.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, t0().date_naive());
        assert_eq!(rows[0].counts.blog, 10);
    }

    let credential = h.store.get_credential(1).await.unwrap().unwrap();
    assert_eq!(credential.used_today, 3);
    assert_eq!(credential.last_error.as_deref(), Some("HTTP 503: unavailable"));
}

#[tokio::test]
async fn test_count_docs_auth_rejection_abandons_the_attempt() {
    let h = Harness::new(&[openapi("first"), openapi("second")], SchedulerSettings::default())
        .await;
    let ids = h.seed_all(&["tent", "stove", "lantern"]).await;
    h.store
        .set_keyword_status(&ids, KeywordStatus::FetchedRel, t0())
        .await
        .unwrap();
    let job_id = h
        .scheduler
        .enqueue(JobKind::CountDocs, JobPayload::new(ids.clone()), None)
        .await
        .unwrap();
    h.docs.fail_next(UpstreamError::status(401, "invalid client"));

    let outcome = h.scheduler.process_next().await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Retrying { attempts: 1, .. }));
    assert_eq!(h.docs.calls(), 1);
    assert!(h.job(job_id).await.error_message.unwrap().contains("401"));

    let credentials = h.store.get_credentials(Default::default()).await.unwrap();
    let disabled = credentials
        .iter()
        .filter(|c| c.status == CredentialStatus::Disabled)
        .count();
    assert_eq!(disabled, 1);
    assert!(credentials.iter().all(|c| c.used_today == 0));

    for keyword in h.store.get_keywords(&ids).await.unwrap() {
        assert_eq!(keyword.status, KeywordStatus::FetchedRel);
        assert!(h.store.doc_counts_for(keyword.id).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_count_docs_fans_out() {
    let h = Harness::with_docs_concurrency(&[openapi("main")], SchedulerSettings::default(), 3)
        .await;
    let ids = h.seed_all(&["tent", "stove", "lantern", "tarp", "cot"]).await;
    h.store
        .set_keyword_status(&ids, KeywordStatus::FetchedRel, t0())
        .await
        .unwrap();
    h.scheduler
        .enqueue_batch(JobKind::CountDocs, &ids, None)
        .await
        .unwrap();

    let completed = h.scheduler.process_next().await.unwrap();
    let ProcessOutcome::Completed { outcome, .. } = completed else {
        panic!("expected the job to complete");
    };
    assert_eq!(outcome.processed, 5);
    assert_eq!(outcome.stored, 5);
    assert_eq!(h.docs.calls(), 5);
}

// ============================================================================
// Run Loop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_run_loop_is_not_reentrant_and_stops() {
    let h = Harness::new(&[openapi("main")], SchedulerSettings::default()).await;
    let ids = h.seed_all(&["tent"]).await;
    h.store
        .set_keyword_status(&ids, KeywordStatus::FetchedRel, t0())
        .await
        .unwrap();
    h.scheduler
        .enqueue_batch(JobKind::CountDocs, &ids, None)
        .await
        .unwrap();

    let runner = Arc::clone(&h.scheduler);
    let handle = tokio::spawn(async move { runner.run_loop().await });

    while !h.scheduler.is_running() {
        tokio::task::yield_now().await;
    }
    // A second loop returns immediately.
    h.scheduler.run_loop().await;
    assert!(h.scheduler.is_running());

    while h.scheduler.get_queue_stats().await.unwrap().completed == 0 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    h.scheduler.stop();
    handle.await.unwrap();
    assert!(!h.scheduler.is_running());
    assert_eq!(h.scheduler.get_processing_stats().docs.processed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_while_stopping_does_not_start_second_loop() {
    let h = Harness::new(&[], SchedulerSettings::default()).await;

    let runner = Arc::clone(&h.scheduler);
    let first = tokio::spawn(async move { runner.run_loop().await });
    while !h.scheduler.is_running() {
        tokio::task::yield_now().await;
    }

    // The first loop is still sleeping between iterations.
    h.scheduler.stop();
    assert!(h.scheduler.is_running());
    let second =
        tokio::time::timeout(std::time::Duration::from_secs(5), h.scheduler.run_loop()).await;
    assert!(second.is_ok(), "a second loop started while the first was stopping");

    first.await.unwrap();
    assert!(!h.scheduler.is_running());

    // Once the first loop is gone the scheduler can be started again.
    let runner = Arc::clone(&h.scheduler);
    let restarted = tokio::spawn(async move { runner.run_loop().await });
    while !h.scheduler.is_running() {
        tokio::task::yield_now().await;
    }
    h.scheduler.stop();
    restarted.await.unwrap();
    assert!(!h.scheduler.is_running());
}

#[tokio::test]
async fn test_requeue_stale_processing_jobs() {
    let h = Harness::new(&[], SchedulerSettings::default()).await;
    let job_id = h
        .scheduler
        .enqueue(JobKind::CountDocs, JobPayload::new(vec![1]), None)
        .await
        .unwrap();
    h.scheduler.claim_next().await.unwrap().unwrap();

    h.clock.advance(Duration::minutes(5));
    assert_eq!(h.scheduler.requeue_stale().await.unwrap(), 0);

    h.clock.advance(Duration::minutes(6));
    assert_eq!(h.scheduler.requeue_stale().await.unwrap(), 1);
    assert_eq!(h.job(job_id).await.status, JobStatus::Pending);
}

// ============================================================================
// Collector
// ============================================================================

#[tokio::test]
async fn test_seed_normalizes_and_rejects_duplicates() {
    let h = Harness::new(&[], SchedulerSettings::default()).await;

    let keyword = h.collector.seed("  Camping   Chair ").await.unwrap();
    assert_eq!(keyword.term, "camping chair");
    assert_eq!(keyword.depth, 0);
    assert_eq!(keyword.status, KeywordStatus::Queued);

    let err = h.collector.seed("camping chair").await.unwrap_err();
    assert!(matches!(err, QueueError::DuplicateKeyword(ref t) if t == "camping chair"));
    assert!(matches!(h.collector.seed("   ").await, Err(QueueError::EmptyKeyword)));
}

#[tokio::test]
async fn test_collect_requires_usable_credential() {
    let h = Harness::new(&[openapi("docs")], SchedulerSettings::default()).await;
    h.seed_all(&["tent"]).await;

    let err = h
        .collector
        .collect(JobKind::FetchRelated, None)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::NoUsableCredential(Provider::SearchAd)));
    assert_eq!(h.scheduler.get_queue_stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_collect_enqueues_waiting_keywords() {
    let h = Harness::new(&[searchad("main")], SchedulerSettings::default()).await;
    h.seed_all(&["a", "b", "c", "d", "e", "f", "g"]).await;

    let report = h
        .collector
        .collect(JobKind::FetchRelated, Some(6))
        .await
        .unwrap();
    assert_eq!(report.keywords, 6);
    assert_eq!(report.job_ids.len(), 2);

    let report = h.collector.collect(JobKind::CountDocs, None).await;
    assert!(matches!(report, Err(QueueError::NoUsableCredential(Provider::OpenApi))));
}
