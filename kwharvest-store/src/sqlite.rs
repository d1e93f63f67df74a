//! SQLite record store.
//!
//! Every mutation that the admission core relies on is a single SQL
//! statement with its precondition in the `WHERE` clause, so concurrent
//! processes sharing the file cannot double-claim a job or lose a token
//! update. Timestamps are stored as Unix milliseconds.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use kwharvest_core::{
    Competition, CoreError, Credential, CredentialFilter, CredentialGuard, CredentialPatch,
    CredentialStatus, CredentialStore, DocCountRecord, DocCounts, Job, JobKind, JobPatch,
    JobPayload, JobStatus, JobStore, Keyword, KeywordMetrics, KeywordPage, KeywordQuery,
    KeywordSource, KeywordStatus, KeywordStore, ListedKeyword, NewCredential, NewJob, NewKeyword,
    Provider, SortColumn, LOW_VOLUME_THRESHOLD,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::persistence::ensure_parent_dir;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS credentials (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    provider           TEXT    NOT NULL,
    label              TEXT    NOT NULL,
    key_id             TEXT    NOT NULL,
    key_secret         TEXT    NOT NULL,
    customer_id        TEXT,
    qps_limit          REAL    NOT NULL,
    daily_quota        INTEGER NOT NULL,
    used_today         INTEGER NOT NULL DEFAULT 0,
    window_tokens      REAL    NOT NULL,
    window_refill_rate REAL    NOT NULL,
    status             TEXT    NOT NULL DEFAULT 'active',
    cooldown_until     INTEGER,
    last_error         TEXT,
    refilled_at        INTEGER NOT NULL,
    last_used_at       INTEGER,
    UNIQUE (provider, label)
);

CREATE TABLE IF NOT EXISTS jobs (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    kind          TEXT    NOT NULL,
    payload       TEXT    NOT NULL,
    status        TEXT    NOT NULL DEFAULT 'pending',
    attempts      INTEGER NOT NULL DEFAULT 0,
    max_attempts  INTEGER NOT NULL,
    scheduled_at  INTEGER NOT NULL,
    created_at    INTEGER NOT NULL,
    started_at    INTEGER,
    completed_at  INTEGER,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs (status, scheduled_at, created_at);

CREATE TABLE IF NOT EXISTS keywords (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    term        TEXT    NOT NULL UNIQUE,
    parent_id   INTEGER REFERENCES keywords (id),
    depth       INTEGER NOT NULL DEFAULT 0,
    source      TEXT    NOT NULL,
    status      TEXT    NOT NULL,
    pc          INTEGER,
    mobile      INTEGER,
    ctr_pc      REAL,
    ctr_mobile  REAL,
    ad_count    INTEGER,
    competition TEXT,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_keywords_status ON keywords (status, id);

CREATE TABLE IF NOT EXISTS doc_counts (
    keyword_id INTEGER NOT NULL REFERENCES keywords (id),
    date       TEXT    NOT NULL,
    blog       INTEGER NOT NULL,
    cafe       INTEGER NOT NULL,
    web        INTEGER NOT NULL,
    news       INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (keyword_id, date)
);
";

const CREDENTIAL_COLUMNS: &str = "id, provider, label, key_id, key_secret, customer_id, \
    qps_limit, daily_quota, used_today, window_tokens, window_refill_rate, status, \
    cooldown_until, last_error, refilled_at, last_used_at";

const JOB_COLUMNS: &str = "id, kind, payload, status, attempts, max_attempts, scheduled_at, \
    created_at, started_at, completed_at, error_message";

const KEYWORD_COLUMNS: &str = "id, term, parent_id, depth, source, status, pc, mobile, \
    ctr_pc, ctr_mobile, ad_count, competition, created_at, updated_at";

// Keywords joined with the newest doc_counts row of each; uncounted keywords
// read as zero documents and keywords without metrics as zero volume.
const LISTED_KEYWORDS: &str = r"
WITH latest AS (
    SELECT d.keyword_id, d.date, d.blog, d.cafe, d.web, d.news
    FROM doc_counts d
    WHERE d.date = (SELECT MAX(date) FROM doc_counts WHERE keyword_id = d.keyword_id)
),
listed AS (
    SELECT k.*,
           CASE WHEN k.pc IS NULL OR k.mobile IS NULL THEN 0 ELSE k.pc + k.mobile END
               AS sv_total,
           l.date AS counted_on,
           COALESCE(l.blog, 0) AS blog_total,
           COALESCE(l.cafe, 0) AS cafe_total,
           COALESCE(l.web, 0)  AS web_total,
           COALESCE(l.news, 0) AS news_total
    FROM keywords k
    LEFT JOIN latest l ON l.keyword_id = k.id
)";

// ============================================================================
// Store
// ============================================================================

/// Record store backed by a SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and applies the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        ensure_parent_dir(path)?;
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        info!(path = %path.display(), "Opened database");
        Self::init(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking thread pool.
    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Task("connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

// ============================================================================
// Row Decoding
// ============================================================================

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}

fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    ms.map(from_millis).transpose()
}

fn parse<T: std::str::FromStr<Err = CoreError>>(raw: &str) -> Result<T, StoreError> {
    raw.parse::<T>().map_err(StoreError::from)
}

fn to_u32(value: i64, what: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{what} out of range: {value}")))
}

fn to_u64(value: i64, what: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{what} out of range: {value}")))
}

fn sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn parse_date(raw: &str) -> Result<NaiveDate, StoreError> {
    raw.parse::<NaiveDate>()
        .map_err(|e| StoreError::Corrupt(format!("date {raw}: {e}")))
}

struct CredentialRow {
    id: i64,
    provider: String,
    label: String,
    key_id: String,
    key_secret: String,
    customer_id: Option<String>,
    qps_limit: f64,
    daily_quota: i64,
    used_today: i64,
    window_tokens: f64,
    window_refill_rate: f64,
    status: String,
    cooldown_until: Option<i64>,
    last_error: Option<String>,
    refilled_at: i64,
    last_used_at: Option<i64>,
}

impl CredentialRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            provider: row.get(1)?,
            label: row.get(2)?,
            key_id: row.get(3)?,
            key_secret: row.get(4)?,
            customer_id: row.get(5)?,
            qps_limit: row.get(6)?,
            daily_quota: row.get(7)?,
            used_today: row.get(8)?,
            window_tokens: row.get(9)?,
            window_refill_rate: row.get(10)?,
            status: row.get(11)?,
            cooldown_until: row.get(12)?,
            last_error: row.get(13)?,
            refilled_at: row.get(14)?,
            last_used_at: row.get(15)?,
        })
    }

    fn decode(self) -> Result<Credential, StoreError> {
        Ok(Credential {
            id: self.id,
            provider: parse::<Provider>(&self.provider)?,
            label: self.label,
            key_id: self.key_id,
            key_secret: self.key_secret,
            customer_id: self.customer_id,
            qps_limit: self.qps_limit,
            daily_quota: to_u32(self.daily_quota, "daily_quota")?,
            used_today: to_u32(self.used_today, "used_today")?,
            window_tokens: self.window_tokens,
            window_refill_rate: self.window_refill_rate,
            status: parse::<CredentialStatus>(&self.status)?,
            cooldown_until: opt_from_millis(self.cooldown_until)?,
            last_error: self.last_error,
            refilled_at: from_millis(self.refilled_at)?,
            last_used_at: opt_from_millis(self.last_used_at)?,
        })
    }
}

struct JobRow {
    id: i64,
    kind: String,
    payload: String,
    status: String,
    attempts: i64,
    max_attempts: i64,
    scheduled_at: i64,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    error_message: Option<String>,
}

impl JobRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            payload: row.get(2)?,
            status: row.get(3)?,
            attempts: row.get(4)?,
            max_attempts: row.get(5)?,
            scheduled_at: row.get(6)?,
            created_at: row.get(7)?,
            started_at: row.get(8)?,
            completed_at: row.get(9)?,
            error_message: row.get(10)?,
        })
    }

    fn decode(self) -> Result<Job, StoreError> {
        Ok(Job {
            id: self.id,
            kind: parse::<JobKind>(&self.kind)?,
            payload: JobPayload::from_json(&self.payload)?,
            status: parse::<JobStatus>(&self.status)?,
            attempts: to_u32(self.attempts, "attempts")?,
            max_attempts: to_u32(self.max_attempts, "max_attempts")?,
            scheduled_at: from_millis(self.scheduled_at)?,
            created_at: from_millis(self.created_at)?,
            started_at: opt_from_millis(self.started_at)?,
            completed_at: opt_from_millis(self.completed_at)?,
            error_message: self.error_message,
        })
    }
}

struct KeywordRow {
    id: i64,
    term: String,
    parent_id: Option<i64>,
    depth: i64,
    source: String,
    status: String,
    pc: Option<i64>,
    mobile: Option<i64>,
    ctr_pc: Option<f64>,
    ctr_mobile: Option<f64>,
    ad_count: Option<i64>,
    competition: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl KeywordRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            term: row.get(1)?,
            parent_id: row.get(2)?,
            depth: row.get(3)?,
            source: row.get(4)?,
            status: row.get(5)?,
            pc: row.get(6)?,
            mobile: row.get(7)?,
            ctr_pc: row.get(8)?,
            ctr_mobile: row.get(9)?,
            ad_count: row.get(10)?,
            competition: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn decode(self) -> Result<Keyword, StoreError> {
        let metrics = match (self.pc, self.mobile) {
            (Some(pc), Some(mobile)) => Some(KeywordMetrics {
                pc: to_u64(pc, "pc")?,
                mobile: to_u64(mobile, "mobile")?,
                ctr_pc: self.ctr_pc.unwrap_or(0.0),
                ctr_mobile: self.ctr_mobile.unwrap_or(0.0),
                ad_count: to_u32(self.ad_count.unwrap_or(0), "ad_count")?,
                competition: self
                    .competition
                    .as_deref()
                    .map(Competition::normalize)
                    .unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(Keyword {
            id: self.id,
            term: self.term,
            parent_id: self.parent_id,
            depth: to_u32(self.depth, "depth")?,
            source: parse::<KeywordSource>(&self.source)?,
            status: parse::<KeywordStatus>(&self.status)?,
            metrics,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
        })
    }
}

fn metrics_values(metrics: Option<&KeywordMetrics>) -> [Value; 6] {
    match metrics {
        Some(m) => [
            Value::Integer(sql_count(m.pc)),
            Value::Integer(sql_count(m.mobile)),
            Value::Real(m.ctr_pc),
            Value::Real(m.ctr_mobile),
            Value::Integer(i64::from(m.ad_count)),
            Value::Text(m.competition.as_str().to_string()),
        ],
        None => [
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Null,
        ],
    }
}

fn opt_millis_value(at: Option<DateTime<Utc>>) -> Value {
    at.map_or(Value::Null, |at| Value::Integer(to_millis(at)))
}

fn opt_text_value(text: Option<&str>) -> Value {
    text.map_or(Value::Null, |t| Value::Text(t.to_string()))
}

fn id_list(ids: &[i64]) -> String {
    ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ")
}

fn load_credential(conn: &Connection, id: i64) -> Result<Option<Credential>, StoreError> {
    let sql = format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE id = ?1");
    conn.query_row(&sql, params![id], CredentialRow::read)
        .optional()?
        .map(CredentialRow::decode)
        .transpose()
}

// ============================================================================
// Credential Store
// ============================================================================

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn get_credentials(
        &self,
        filter: CredentialFilter,
    ) -> Result<Vec<Credential>, CoreError> {
        let rows = self
            .call(move |conn| {
                let mut sql = format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE 1 = 1");
                let mut values = Vec::new();
                if let Some(provider) = filter.provider {
                    sql.push_str(" AND provider = ?");
                    values.push(Value::Text(provider.as_str().to_string()));
                }
                if let Some(status) = filter.status {
                    sql.push_str(" AND status = ?");
                    values.push(Value::Text(status.as_str().to_string()));
                }
                sql.push_str(" ORDER BY id");

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(values), CredentialRow::read)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.into_iter()
                    .map(CredentialRow::decode)
                    .collect::<Result<Vec<_>, _>>()
            })
            .await?;
        Ok(rows)
    }

    async fn get_credential(&self, id: i64) -> Result<Option<Credential>, CoreError> {
        Ok(self.call(move |conn| load_credential(conn, id)).await?)
    }

    async fn update_credential(
        &self,
        id: i64,
        guard: &CredentialGuard,
        patch: &CredentialPatch,
    ) -> Result<bool, CoreError> {
        if patch.is_empty() {
            return Ok(false);
        }
        let guard = guard.clone();
        let patch = patch.clone();

        let applied = self
            .call(move |conn| {
                let mut sets = Vec::new();
                let mut values = Vec::new();

                if let Some(tokens) = patch.window_tokens {
                    sets.push("window_tokens = ?");
                    values.push(Value::Real(tokens));
                }
                if let Some(used) = patch.used_today {
                    sets.push("used_today = ?");
                    values.push(Value::Integer(i64::from(used)));
                }
                if let Some(status) = patch.status {
                    sets.push("status = ?");
                    values.push(Value::Text(status.as_str().to_string()));
                }
                if let Some(until) = patch.cooldown_until {
                    sets.push("cooldown_until = ?");
                    values.push(opt_millis_value(until));
                }
                if let Some(ref error) = patch.last_error {
                    sets.push("last_error = ?");
                    values.push(opt_text_value(error.as_deref()));
                }
                if let Some(at) = patch.refilled_at {
                    sets.push("refilled_at = ?");
                    values.push(Value::Integer(to_millis(at)));
                }
                if let Some(at) = patch.last_used_at {
                    sets.push("last_used_at = ?");
                    values.push(Value::Integer(to_millis(at)));
                }

                let mut sql = format!("UPDATE credentials SET {} WHERE id = ?", sets.join(", "));
                values.push(Value::Integer(id));

                if let Some(status) = guard.status {
                    sql.push_str(" AND status = ?");
                    values.push(Value::Text(status.as_str().to_string()));
                }
                if let Some(tokens) = guard.window_tokens {
                    sql.push_str(" AND window_tokens = ?");
                    values.push(Value::Real(tokens));
                }
                if let Some(used) = guard.used_today {
                    sql.push_str(" AND used_today = ?");
                    values.push(Value::Integer(i64::from(used)));
                }

                let changed = conn.execute(&sql, params_from_iter(values))?;
                Ok(changed == 1)
            })
            .await?;
        Ok(applied)
    }

    async fn upsert_credential(
        &self,
        new: &NewCredential,
        initial_tokens: f64,
        now: DateTime<Utc>,
    ) -> Result<Credential, CoreError> {
        let new = new.clone();
        let credential = self
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO credentials (provider, label, key_id, key_secret, customer_id, \
                        qps_limit, daily_quota, window_tokens, window_refill_rate, refilled_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?6, ?9) \
                     ON CONFLICT (provider, label) DO UPDATE SET \
                        key_id = excluded.key_id, \
                        key_secret = excluded.key_secret, \
                        customer_id = excluded.customer_id, \
                        qps_limit = excluded.qps_limit, \
                        daily_quota = excluded.daily_quota, \
                        window_refill_rate = excluded.window_refill_rate",
                    params![
                        new.provider.as_str(),
                        new.label,
                        new.key_id,
                        new.key_secret,
                        new.customer_id,
                        new.qps_limit,
                        i64::from(new.daily_quota),
                        initial_tokens,
                        to_millis(now),
                    ],
                )?;
                let id: i64 = tx.query_row(
                    "SELECT id FROM credentials WHERE provider = ?1 AND label = ?2",
                    params![new.provider.as_str(), new.label],
                    |row| row.get(0),
                )?;
                let credential = load_credential(&tx, id)?.ok_or_else(|| {
                    StoreError::Corrupt(format!("credential {id} vanished during upsert"))
                })?;
                tx.commit()?;
                Ok(credential)
            })
            .await?;
        debug!(id = credential.id, label = %credential.label, "Upserted credential");
        Ok(credential)
    }
}

// ============================================================================
// Job Store
// ============================================================================

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert_job(&self, job: &NewJob, now: DateTime<Utc>) -> Result<i64, CoreError> {
        let job = job.clone();
        let payload = job.payload.to_json()?;
        let id = self
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO jobs (kind, payload, status, attempts, max_attempts, scheduled_at, created_at) \
                     VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?5)",
                    params![
                        job.kind.as_str(),
                        payload,
                        i64::from(job.max_attempts),
                        to_millis(job.scheduled_at),
                        to_millis(now),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    async fn claim_oldest_eligible_job(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, CoreError> {
        let job = self
            .call(move |conn| {
                let sql = format!(
                    "UPDATE jobs SET status = 'processing', started_at = ?1 \
                     WHERE id = ( \
                        SELECT id FROM jobs \
                        WHERE status = 'pending' AND scheduled_at <= ?1 \
                        ORDER BY created_at, id LIMIT 1 \
                     ) AND status = 'pending' \
                     RETURNING {JOB_COLUMNS}"
                );
                conn.query_row(&sql, params![to_millis(now)], JobRow::read)
                    .optional()?
                    .map(JobRow::decode)
                    .transpose()
            })
            .await?;
        Ok(job)
    }

    async fn update_job(
        &self,
        id: i64,
        expected: Option<JobStatus>,
        patch: &JobPatch,
    ) -> Result<bool, CoreError> {
        let patch = patch.clone();
        let applied = self
            .call(move |conn| {
                let mut sets = Vec::new();
                let mut values = Vec::new();

                if let Some(status) = patch.status {
                    sets.push("status = ?");
                    values.push(Value::Text(status.as_str().to_string()));
                }
                if let Some(attempts) = patch.attempts {
                    sets.push("attempts = ?");
                    values.push(Value::Integer(i64::from(attempts)));
                }
                if let Some(at) = patch.scheduled_at {
                    sets.push("scheduled_at = ?");
                    values.push(Value::Integer(to_millis(at)));
                }
                if let Some(at) = patch.started_at {
                    sets.push("started_at = ?");
                    values.push(opt_millis_value(at));
                }
                if let Some(at) = patch.completed_at {
                    sets.push("completed_at = ?");
                    values.push(Value::Integer(to_millis(at)));
                }
                if let Some(ref message) = patch.error_message {
                    sets.push("error_message = ?");
                    values.push(opt_text_value(message.as_deref()));
                }
                if sets.is_empty() {
                    return Ok(false);
                }

                let mut sql = format!("UPDATE jobs SET {} WHERE id = ?", sets.join(", "));
                values.push(Value::Integer(id));
                if let Some(status) = expected {
                    sql.push_str(" AND status = ?");
                    values.push(Value::Text(status.as_str().to_string()));
                }

                Ok(conn.execute(&sql, params_from_iter(values))? == 1)
            })
            .await?;
        Ok(applied)
    }

    async fn get_job(&self, id: i64) -> Result<Option<Job>, CoreError> {
        let job = self
            .call(move |conn| {
                let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
                conn.query_row(&sql, params![id], JobRow::read)
                    .optional()?
                    .map(JobRow::decode)
                    .transpose()
            })
            .await?;
        Ok(job)
    }

    async fn count_jobs_by_status(&self) -> Result<HashMap<JobStatus, u64>, CoreError> {
        let counts = self
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                let mut counts = HashMap::new();
                for (status, count) in rows {
                    counts.insert(parse::<JobStatus>(&status)?, to_u64(count, "count")?);
                }
                Ok(counts)
            })
            .await?;
        Ok(counts)
    }

    async fn requeue_stale_jobs(
        &self,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let changed = self
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE jobs SET status = 'pending', scheduled_at = ?2, started_at = NULL \
                     WHERE status = 'processing' AND (started_at IS NULL OR started_at < ?1)",
                    params![to_millis(started_before), to_millis(now)],
                )?;
                Ok(changed as u64)
            })
            .await?;
        Ok(changed)
    }
}

// ============================================================================
// Keyword Store
// ============================================================================

fn insert_keyword_row(
    conn: &Connection,
    keyword: &NewKeyword,
    now: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let [pc, mobile, ctr_pc, ctr_mobile, ad_count, competition] =
        metrics_values(keyword.metrics.as_ref());
    conn.execute(
        "INSERT INTO keywords (term, parent_id, depth, source, status, pc, mobile, ctr_pc, \
            ctr_mobile, ad_count, competition, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            keyword.term,
            keyword.parent_id,
            i64::from(keyword.depth),
            keyword.source.as_str(),
            keyword.status.as_str(),
            pc,
            mobile,
            ctr_pc,
            ctr_mobile,
            ad_count,
            competition,
            to_millis(now),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn listing_column(column: SortColumn) -> &'static str {
    match column {
        SortColumn::Volume => "sv_total",
        SortColumn::Blog => "blog_total",
        SortColumn::Cafe => "cafe_total",
        SortColumn::Web => "web_total",
        SortColumn::News => "news_total",
        SortColumn::Term => "term",
        SortColumn::Depth => "depth",
        SortColumn::CreatedAt => "created_at",
    }
}

/// The `WHERE` clause of a listing query and its bound values.
fn listing_filter(query: &KeywordQuery) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(term) = query.search_term() {
        clauses.push("instr(term, ?) > 0".to_string());
        values.push(Value::Text(term));
    }
    if let Some(status) = query.status {
        clauses.push("status = ?".to_string());
        values.push(Value::Text(status.as_str().to_string()));
    }
    if query.hide_low_volume {
        clauses.push("sv_total >= ?".to_string());
        values.push(Value::Integer(sql_count(LOW_VOLUME_THRESHOLD)));
    }
    if query.hide_zero_docs {
        clauses.push("(blog_total + cafe_total + web_total + news_total) > 0".to_string());
    }
    for (column, range) in query.ranges() {
        let column = listing_column(column);
        if let Some(min) = range.min {
            clauses.push(format!("{column} >= ?"));
            values.push(Value::Integer(sql_count(min)));
        }
        if let Some(max) = range.max {
            clauses.push(format!("{column} <= ?"));
            values.push(Value::Integer(sql_count(max)));
        }
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), values)
    }
}

fn listing_order(query: &KeywordQuery) -> String {
    let mut terms: Vec<String> = query
        .sort
        .iter()
        .map(|key| {
            let direction = if key.descending { "DESC" } else { "ASC" };
            format!("{} {direction}", listing_column(key.column))
        })
        .collect();
    terms.push("id ASC".to_string());
    format!("ORDER BY {}", terms.join(", "))
}

fn load_keywords(
    conn: &Connection,
    sql: &str,
    values: Vec<Value>,
) -> Result<Vec<Keyword>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), KeywordRow::read)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(KeywordRow::decode).collect()
}

#[async_trait]
impl KeywordStore for SqliteStore {
    async fn insert_keyword(
        &self,
        keyword: &NewKeyword,
        now: DateTime<Utc>,
    ) -> Result<Keyword, CoreError> {
        let keyword = keyword.clone();
        let record = self
            .call(move |conn| {
                let exists: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM keywords WHERE term = ?1",
                        params![keyword.term],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_some() {
                    return Err(StoreError::Duplicate(format!(
                        "keyword already exists: {}",
                        keyword.term
                    )));
                }
                let id = insert_keyword_row(conn, &keyword, now)?;
                let sql = format!("SELECT {KEYWORD_COLUMNS} FROM keywords WHERE id = ?");
                load_keywords(conn, &sql, vec![Value::Integer(id)])?
                    .pop()
                    .ok_or_else(|| StoreError::Corrupt(format!("keyword {id} vanished")))
            })
            .await?;
        Ok(record)
    }

    async fn upsert_related(
        &self,
        keywords: &[NewKeyword],
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let keywords = keywords.to_vec();
        let inserted = self
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                for keyword in &keywords {
                    let existing: Option<i64> = tx
                        .query_row(
                            "SELECT id FROM keywords WHERE term = ?1",
                            params![keyword.term],
                            |row| row.get(0),
                        )
                        .optional()?;
                    match existing {
                        Some(id) => {
                            if keyword.metrics.is_some() {
                                let [pc, mobile, ctr_pc, ctr_mobile, ad_count, competition] =
                                    metrics_values(keyword.metrics.as_ref());
                                tx.execute(
                                    "UPDATE keywords SET pc = ?1, mobile = ?2, ctr_pc = ?3, \
                                        ctr_mobile = ?4, ad_count = ?5, competition = ?6, \
                                        updated_at = ?7 WHERE id = ?8",
                                    params![
                                        pc,
                                        mobile,
                                        ctr_pc,
                                        ctr_mobile,
                                        ad_count,
                                        competition,
                                        to_millis(now),
                                        id
                                    ],
                                )?;
                            }
                        }
                        None => {
                            insert_keyword_row(&tx, keyword, now)?;
                            inserted += 1;
                        }
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        Ok(inserted)
    }

    async fn get_keywords(&self, ids: &[i64]) -> Result<Vec<Keyword>, CoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = ids.to_vec();
        let keywords = self
            .call(move |conn| {
                let sql = format!(
                    "SELECT {KEYWORD_COLUMNS} FROM keywords WHERE id IN ({}) ORDER BY id",
                    id_list(&ids)
                );
                load_keywords(conn, &sql, ids.into_iter().map(Value::Integer).collect())
            })
            .await?;
        Ok(keywords)
    }

    async fn find_keyword(&self, term: &str) -> Result<Option<Keyword>, CoreError> {
        let term = term.to_string();
        let keyword = self
            .call(move |conn| {
                let sql = format!("SELECT {KEYWORD_COLUMNS} FROM keywords WHERE term = ?");
                Ok(load_keywords(conn, &sql, vec![Value::Text(term)])?.pop())
            })
            .await?;
        Ok(keyword)
    }

    async fn keywords_by_status(
        &self,
        status: KeywordStatus,
        limit: usize,
    ) -> Result<Vec<Keyword>, CoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let keywords = self
            .call(move |conn| {
                let sql = format!(
                    "SELECT {KEYWORD_COLUMNS} FROM keywords WHERE status = ? ORDER BY id LIMIT ?"
                );
                load_keywords(
                    conn,
                    &sql,
                    vec![
                        Value::Text(status.as_str().to_string()),
                        Value::Integer(limit),
                    ],
                )
            })
            .await?;
        Ok(keywords)
    }

    async fn set_keyword_status(
        &self,
        ids: &[i64],
        status: KeywordStatus,
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids = ids.to_vec();
        let changed = self
            .call(move |conn| {
                let sql = format!(
                    "UPDATE keywords SET status = ?, updated_at = ? WHERE id IN ({})",
                    id_list(&ids)
                );
                let mut values = vec![
                    Value::Text(status.as_str().to_string()),
                    Value::Integer(to_millis(now)),
                ];
                values.extend(ids.into_iter().map(Value::Integer));
                Ok(conn.execute(&sql, params_from_iter(values))? as u64)
            })
            .await?;
        Ok(changed)
    }

    async fn save_doc_counts(
        &self,
        record: &DocCountRecord,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let record = record.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO doc_counts (keyword_id, date, blog, cafe, web, news, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT (keyword_id, date) DO UPDATE SET \
                    blog = excluded.blog, cafe = excluded.cafe, web = excluded.web, \
                    news = excluded.news, updated_at = excluded.updated_at",
                params![
                    record.keyword_id,
                    record.date.to_string(),
                    sql_count(record.counts.blog),
                    sql_count(record.counts.cafe),
                    sql_count(record.counts.web),
                    sql_count(record.counts.news),
                    to_millis(now),
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn doc_counts_for(&self, keyword_id: i64) -> Result<Vec<DocCountRecord>, CoreError> {
        let records = self
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT date, blog, cafe, web, news FROM doc_counts \
                     WHERE keyword_id = ?1 ORDER BY date DESC",
                )?;
                let rows = stmt
                    .query_map(params![keyword_id], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                rows.into_iter()
                    .map(|(date, blog, cafe, web, news)| {
                        Ok(DocCountRecord {
                            keyword_id,
                            date: parse_date(&date)?,
                            counts: DocCounts {
                                blog: to_u64(blog, "blog")?,
                                cafe: to_u64(cafe, "cafe")?,
                                web: to_u64(web, "web")?,
                                news: to_u64(news, "news")?,
                            },
                        })
                    })
                    .collect()
            })
            .await?;
        Ok(records)
    }

    async fn count_keywords_by_status(
        &self,
    ) -> Result<HashMap<KeywordStatus, u64>, CoreError> {
        let counts = self
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT status, COUNT(*) FROM keywords GROUP BY status")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                let mut counts = HashMap::new();
                for (status, count) in rows {
                    counts.insert(parse::<KeywordStatus>(&status)?, to_u64(count, "count")?);
                }
                Ok(counts)
            })
            .await?;
        Ok(counts)
    }

    async fn list_keywords(&self, query: &KeywordQuery) -> Result<KeywordPage, CoreError> {
        let query = query.clone();
        let page = self
            .call(move |conn| {
                let (filter, values) = listing_filter(&query);

                let count_sql = format!("{LISTED_KEYWORDS} SELECT COUNT(*) FROM listed {filter}");
                let total: i64 =
                    conn.query_row(&count_sql, params_from_iter(values.clone()), |row| {
                        row.get(0)
                    })?;

                let sql = format!(
                    "{LISTED_KEYWORDS} SELECT {KEYWORD_COLUMNS}, counted_on, blog_total, \
                        cafe_total, web_total, news_total FROM listed {filter} {} \
                     LIMIT ? OFFSET ?",
                    listing_order(&query)
                );
                let mut values = values;
                values.push(Value::Integer(
                    i64::try_from(query.page_size()).unwrap_or(i64::MAX),
                ));
                values.push(Value::Integer(
                    i64::try_from(query.offset).unwrap_or(i64::MAX),
                ));

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(values), |row| {
                        Ok((
                            KeywordRow::read(row)?,
                            row.get::<_, Option<String>>(14)?,
                            [
                                row.get::<_, i64>(15)?,
                                row.get::<_, i64>(16)?,
                                row.get::<_, i64>(17)?,
                                row.get::<_, i64>(18)?,
                            ],
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                let mut keywords = Vec::with_capacity(rows.len());
                for (row, counted_on, [blog, cafe, web, news]) in rows {
                    let keyword = row.decode()?;
                    let latest = counted_on
                        .map(|date| -> Result<DocCountRecord, StoreError> {
                            Ok(DocCountRecord {
                                keyword_id: keyword.id,
                                date: parse_date(&date)?,
                                counts: DocCounts {
                                    blog: to_u64(blog, "blog")?,
                                    cafe: to_u64(cafe, "cafe")?,
                                    web: to_u64(web, "web")?,
                                    news: to_u64(news, "news")?,
                                },
                            })
                        })
                        .transpose()?;
                    keywords.push(ListedKeyword::new(keyword, latest.as_ref()));
                }

                Ok(KeywordPage::new(
                    keywords,
                    to_u64(total, "count")?,
                    query.offset,
                ))
            })
            .await?;
        Ok(page)
    }
}
