//! In-memory record store.
//!
//! Implements the same contract as [`SqliteStore`](crate::SqliteStore) behind
//! a single mutex, so every operation is trivially atomic. Used for tests
//! and dry runs.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use kwharvest_core::{
    CoreError, Credential, CredentialFilter, CredentialGuard, CredentialPatch, CredentialStatus,
    CredentialStore, DocCountRecord, Job, JobPatch, JobStatus, JobStore, Keyword, KeywordPage,
    KeywordQuery, KeywordStatus, KeywordStore, ListedKeyword, NewCredential, NewJob, NewKeyword,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    credentials: BTreeMap<i64, Credential>,
    jobs: BTreeMap<i64, Job>,
    keywords: BTreeMap<i64, Keyword>,
    doc_counts: BTreeMap<(i64, NaiveDate), DocCountRecord>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Record store kept entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, CoreError> {
        self.state
            .lock()
            .map_err(|_| CoreError::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_credentials(
        &self,
        filter: CredentialFilter,
    ) -> Result<Vec<Credential>, CoreError> {
        let state = self.lock()?;
        Ok(state
            .credentials
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn get_credential(&self, id: i64) -> Result<Option<Credential>, CoreError> {
        Ok(self.lock()?.credentials.get(&id).cloned())
    }

    async fn update_credential(
        &self,
        id: i64,
        guard: &CredentialGuard,
        patch: &CredentialPatch,
    ) -> Result<bool, CoreError> {
        let mut state = self.lock()?;
        let Some(credential) = state.credentials.get_mut(&id) else {
            return Ok(false);
        };
        if !guard.matches(credential) {
            return Ok(false);
        }
        patch.apply(credential);
        Ok(true)
    }

    async fn upsert_credential(
        &self,
        new: &NewCredential,
        initial_tokens: f64,
        now: DateTime<Utc>,
    ) -> Result<Credential, CoreError> {
        let mut state = self.lock()?;

        if let Some(existing) = state
            .credentials
            .values_mut()
            .find(|c| c.provider == new.provider && c.label == new.label)
        {
            existing.key_id.clone_from(&new.key_id);
            existing.key_secret.clone_from(&new.key_secret);
            existing.customer_id.clone_from(&new.customer_id);
            existing.qps_limit = new.qps_limit;
            existing.daily_quota = new.daily_quota;
            existing.window_refill_rate = new.qps_limit;
            return Ok(existing.clone());
        }

        let id = state.next_id();
        let credential = Credential {
            id,
            provider: new.provider,
            label: new.label.clone(),
            key_id: new.key_id.clone(),
            key_secret: new.key_secret.clone(),
            customer_id: new.customer_id.clone(),
            qps_limit: new.qps_limit,
            daily_quota: new.daily_quota,
            used_today: 0,
            window_tokens: initial_tokens,
            window_refill_rate: new.qps_limit,
            status: CredentialStatus::Active,
            cooldown_until: None,
            last_error: None,
            refilled_at: now,
            last_used_at: None,
        };
        state.credentials.insert(id, credential.clone());
        Ok(credential)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &NewJob, now: DateTime<Utc>) -> Result<i64, CoreError> {
        let mut state = self.lock()?;
        let id = state.next_id();
        state.jobs.insert(
            id,
            Job {
                id,
                kind: job.kind,
                payload: job.payload.clone(),
                status: JobStatus::Pending,
                attempts: 0,
                max_attempts: job.max_attempts,
                scheduled_at: job.scheduled_at,
                created_at: now,
                started_at: None,
                completed_at: None,
                error_message: None,
            },
        );
        Ok(id)
    }

    async fn claim_oldest_eligible_job(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, CoreError> {
        let mut state = self.lock()?;
        let next = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.scheduled_at <= now)
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.status = JobStatus::Processing;
        job.started_at = Some(now);
        Ok(Some(job.clone()))
    }

    async fn update_job(
        &self,
        id: i64,
        expected: Option<JobStatus>,
        patch: &JobPatch,
    ) -> Result<bool, CoreError> {
        let mut state = self.lock()?;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if expected.is_some_and(|s| s != job.status) {
            return Ok(false);
        }
        patch.apply(job);
        Ok(true)
    }

    async fn get_job(&self, id: i64) -> Result<Option<Job>, CoreError> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    async fn count_jobs_by_status(&self) -> Result<HashMap<JobStatus, u64>, CoreError> {
        let state = self.lock()?;
        let mut counts = HashMap::new();
        for job in state.jobs.values() {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn requeue_stale_jobs(
        &self,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let mut state = self.lock()?;
        let mut requeued = 0;
        for job in state.jobs.values_mut() {
            if job.status == JobStatus::Processing
                && job.started_at.is_none_or(|at| at < started_before)
            {
                job.status = JobStatus::Pending;
                job.scheduled_at = now;
                job.started_at = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }
}

#[async_trait]
impl KeywordStore for MemoryStore {
    async fn insert_keyword(
        &self,
        keyword: &NewKeyword,
        now: DateTime<Utc>,
    ) -> Result<Keyword, CoreError> {
        let mut state = self.lock()?;
        if state.keywords.values().any(|k| k.term == keyword.term) {
            return Err(CoreError::Conflict(format!(
                "keyword already exists: {}",
                keyword.term
            )));
        }
        let id = state.next_id();
        let record = Keyword {
            id,
            term: keyword.term.clone(),
            parent_id: keyword.parent_id,
            depth: keyword.depth,
            source: keyword.source,
            status: keyword.status,
            metrics: keyword.metrics,
            created_at: now,
            updated_at: now,
        };
        state.keywords.insert(id, record.clone());
        Ok(record)
    }

    async fn upsert_related(
        &self,
        keywords: &[NewKeyword],
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let mut state = self.lock()?;
        let mut inserted = 0;
        for keyword in keywords {
            if let Some(existing) = state.keywords.values_mut().find(|k| k.term == keyword.term) {
                if keyword.metrics.is_some() {
                    existing.metrics = keyword.metrics;
                    existing.updated_at = now;
                }
                continue;
            }
            let id = state.next_id();
            state.keywords.insert(
                id,
                Keyword {
                    id,
                    term: keyword.term.clone(),
                    parent_id: keyword.parent_id,
                    depth: keyword.depth,
                    source: keyword.source,
                    status: keyword.status,
                    metrics: keyword.metrics,
                    created_at: now,
                    updated_at: now,
                },
            );
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn get_keywords(&self, ids: &[i64]) -> Result<Vec<Keyword>, CoreError> {
        let state = self.lock()?;
        let mut found: Vec<Keyword> = ids
            .iter()
            .filter_map(|id| state.keywords.get(id).cloned())
            .collect();
        found.sort_by_key(|k| k.id);
        found.dedup_by_key(|k| k.id);
        Ok(found)
    }

    async fn find_keyword(&self, term: &str) -> Result<Option<Keyword>, CoreError> {
        let state = self.lock()?;
        Ok(state.keywords.values().find(|k| k.term == term).cloned())
    }

    async fn keywords_by_status(
        &self,
        status: KeywordStatus,
        limit: usize,
    ) -> Result<Vec<Keyword>, CoreError> {
        let state = self.lock()?;
        Ok(state
            .keywords
            .values()
            .filter(|k| k.status == status)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_keyword_status(
        &self,
        ids: &[i64],
        status: KeywordStatus,
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let mut state = self.lock()?;
        let mut changed = 0;
        for id in ids {
            if let Some(keyword) = state.keywords.get_mut(id) {
                keyword.status = status;
                keyword.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn save_doc_counts(
        &self,
        record: &DocCountRecord,
        _now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let mut state = self.lock()?;
        state
            .doc_counts
            .insert((record.keyword_id, record.date), record.clone());
        Ok(())
    }

    async fn doc_counts_for(&self, keyword_id: i64) -> Result<Vec<DocCountRecord>, CoreError> {
        let state = self.lock()?;
        let mut records: Vec<DocCountRecord> = state
            .doc_counts
            .values()
            .filter(|r| r.keyword_id == keyword_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(records)
    }

    async fn count_keywords_by_status(
        &self,
    ) -> Result<HashMap<KeywordStatus, u64>, CoreError> {
        let state = self.lock()?;
        let mut counts = HashMap::new();
        for keyword in state.keywords.values() {
            *counts.entry(keyword.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn list_keywords(&self, query: &KeywordQuery) -> Result<KeywordPage, CoreError> {
        let state = self.lock()?;
        let mut rows: Vec<ListedKeyword> = state
            .keywords
            .values()
            .map(|keyword| {
                let latest = state
                    .doc_counts
                    .range((keyword.id, NaiveDate::MIN)..=(keyword.id, NaiveDate::MAX))
                    .next_back()
                    .map(|(_, record)| record);
                ListedKeyword::new(keyword.clone(), latest)
            })
            .filter(|row| query.matches(row))
            .collect();
        rows.sort_by(|a, b| query.compare(a, b));
        Ok(KeywordPage::from_sorted(rows, query))
    }
}
