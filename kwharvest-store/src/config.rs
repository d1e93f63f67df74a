//! Configuration management.
//!
//! Configuration is a JSON file with one section per concern. Every field
//! has a default, so an empty object (or a missing file) is a valid config.
//! Credential lists can also come from `KWHARVEST_SEARCHAD_KEYS` /
//! `KWHARVEST_OPENAPI_KEYS`, each a JSON array of key entries.

use kwharvest_core::{NewCredential, Provider};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::persistence::{default_config_path, default_database_path, read_json, write_json};

/// Environment variable holding search-ad keys.
pub const SEARCHAD_KEYS_ENV: &str = "KWHARVEST_SEARCHAD_KEYS";

/// Environment variable holding open-API keys.
pub const OPENAPI_KEYS_ENV: &str = "KWHARVEST_OPENAPI_KEYS";

// ============================================================================
// Config
// ============================================================================

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Admission control settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Upstream call retry settings.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Job queue settings.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Static credential list.
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
}

/// Database settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    /// Resolved database path.
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_database_path)
    }
}

/// Admission control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Concurrency ceilings per operation class.
    #[serde(default)]
    pub global_slots: GlobalSlotsConfig,
    /// Token bucket shape.
    #[serde(default)]
    pub token_bucket: TokenBucketConfig,
    /// Cooldowns after a 429.
    #[serde(default)]
    pub cooldown: CooldownConfig,
    /// How long a 401/403 disables a credential.
    #[serde(default = "default_disable_secs")]
    pub disable_secs: u64,
    /// Lifetime of a cached credential selection.
    #[serde(default = "default_selection_cache_ttl_ms")]
    pub selection_cache_ttl_ms: u64,
    /// How often expired cooldowns are reactivated.
    #[serde(default = "default_cooldown_check_secs")]
    pub cooldown_check_secs: u64,
    /// Poll interval of the in-process admission queue.
    #[serde(default = "default_admission_poll_ms")]
    pub admission_poll_ms: u64,
}

/// Concurrency ceilings per operation class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSlotsConfig {
    /// Related-keyword fetches.
    #[serde(default = "default_related_slots")]
    pub related: usize,
    /// Document-count lookups.
    #[serde(default = "default_docs_slots")]
    pub docs: usize,
}

/// Token bucket shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Bucket capacity as a multiple of the credential's QPS.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: f64,
    /// Refill period.
    #[serde(default = "default_refill_interval_ms")]
    pub refill_interval_ms: u64,
}

/// Cooldowns after a 429, per provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    /// Search-ad cooldown.
    #[serde(default = "default_searchad_cooldown_secs")]
    pub searchad_secs: u64,
    /// Open-API cooldown.
    #[serde(default = "default_openapi_cooldown_secs")]
    pub openapi_secs: u64,
}

impl CooldownConfig {
    /// Cooldown for a provider.
    pub fn for_provider(&self, provider: Provider) -> Duration {
        Duration::from_secs(match provider {
            Provider::SearchAd => self.searchad_secs,
            Provider::OpenApi => self.openapi_secs,
        })
    }
}

/// Upstream call retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per call.
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Delay ceiling.
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Apply ±25% jitter.
    #[serde(default = "default_true")]
    pub jitter: bool,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Job queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Idle sleep of the run loop.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Reschedule delay after the first failure.
    #[serde(default = "default_job_base_delay_ms")]
    pub job_base_delay_ms: u64,
    /// Reschedule delay ceiling.
    #[serde(default = "default_job_max_delay_ms")]
    pub job_max_delay_ms: u64,
    /// Attempts per job.
    #[serde(default = "default_job_max_attempts")]
    pub default_max_attempts: u32,
    /// Keywords per related-keyword job (and call).
    #[serde(default = "default_related_batch_size")]
    pub related_batch_size: usize,
    /// Keywords per document-count job.
    #[serde(default = "default_docs_batch_size")]
    pub docs_batch_size: usize,
    /// Concurrent document-count calls within one job.
    #[serde(default = "default_docs_concurrency")]
    pub docs_concurrency: usize,
    /// Processing jobs older than this are returned to pending at startup.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_disable_secs() -> u64 {
    3600
}
fn default_selection_cache_ttl_ms() -> u64 {
    1000
}
fn default_cooldown_check_secs() -> u64 {
    10
}
fn default_admission_poll_ms() -> u64 {
    1000
}
fn default_related_slots() -> usize {
    4
}
fn default_docs_slots() -> usize {
    10
}
fn default_max_tokens() -> f64 {
    2.0
}
fn default_refill_interval_ms() -> u64 {
    1000
}
fn default_searchad_cooldown_secs() -> u64 {
    300
}
fn default_openapi_cooldown_secs() -> u64 {
    60
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_retry_max_delay_ms() -> u64 {
    30_000
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_job_base_delay_ms() -> u64 {
    1000
}
fn default_job_max_delay_ms() -> u64 {
    30_000
}
fn default_job_max_attempts() -> u32 {
    3
}
fn default_related_batch_size() -> usize {
    5
}
fn default_docs_batch_size() -> usize {
    10
}
fn default_docs_concurrency() -> usize {
    5
}
fn default_stale_after_secs() -> u64 {
    600
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_slots: GlobalSlotsConfig::default(),
            token_bucket: TokenBucketConfig::default(),
            cooldown: CooldownConfig::default(),
            disable_secs: default_disable_secs(),
            selection_cache_ttl_ms: default_selection_cache_ttl_ms(),
            cooldown_check_secs: default_cooldown_check_secs(),
            admission_poll_ms: default_admission_poll_ms(),
        }
    }
}

impl Default for GlobalSlotsConfig {
    fn default() -> Self {
        Self {
            related: default_related_slots(),
            docs: default_docs_slots(),
        }
    }
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            refill_interval_ms: default_refill_interval_ms(),
        }
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            searchad_secs: default_searchad_cooldown_secs(),
            openapi_secs: default_openapi_cooldown_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            jitter: true,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            job_base_delay_ms: default_job_base_delay_ms(),
            job_max_delay_ms: default_job_max_delay_ms(),
            default_max_attempts: default_job_max_attempts(),
            related_batch_size: default_related_batch_size(),
            docs_batch_size: default_docs_batch_size(),
            docs_concurrency: default_docs_concurrency(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Key material and limits of one credential.
///
/// Accepts both snake_case names and the camelCase names used by the
/// environment variable format (`clientId`, `accessLicense`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyEntry {
    /// Unique label within the provider.
    pub label: String,
    /// Public key material.
    #[serde(default, alias = "clientId", alias = "accessLicense")]
    pub key_id: String,
    /// Secret key material.
    #[serde(default, alias = "clientSecret", alias = "secret")]
    pub key_secret: String,
    /// Customer id (search-ad only).
    #[serde(default, alias = "customerId", skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Queries per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qps: Option<f64>,
    /// Daily quota.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily: Option<u32>,
}

/// A credential from the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Upstream service.
    pub provider: Provider,
    /// Key material and limits.
    #[serde(flatten)]
    pub key: KeyEntry,
}

impl CredentialConfig {
    /// Converts to a store record, filling provider defaults for missing limits.
    pub fn to_new_credential(&self) -> NewCredential {
        NewCredential {
            provider: self.provider,
            label: self.key.label.trim().to_string(),
            key_id: self.key.key_id.clone(),
            key_secret: self.key.key_secret.clone(),
            customer_id: self.key.customer_id.clone(),
            qps_limit: self
                .key
                .qps
                .filter(|q| *q > 0.0)
                .unwrap_or_else(|| self.provider.default_qps()),
            daily_quota: self
                .key
                .daily
                .filter(|d| *d > 0)
                .unwrap_or_else(|| self.provider.default_daily_quota()),
        }
    }

    /// Problems with this entry.
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let label = self.key.label.trim();
        let name = format!("{}/{}", self.provider, label);

        if label.is_empty() {
            problems.push(format!("{} credential without a label", self.provider));
        }
        if self.key.key_id.trim().is_empty() {
            problems.push(format!("{name}: key_id is empty"));
        }
        if self.key.key_secret.trim().is_empty() {
            problems.push(format!("{name}: key_secret is empty"));
        }
        if self.provider.requires_customer_id()
            && self.key.customer_id.as_deref().is_none_or(|c| c.trim().is_empty())
        {
            problems.push(format!("{name}: customer_id is required"));
        }
        if self.key.qps.is_some_and(|q| !q.is_finite() || q < 0.0) {
            problems.push(format!("{name}: qps must be positive"));
        }
        problems
    }
}

/// Parses a JSON array of key entries for one provider.
pub fn parse_key_list(provider: Provider, raw: &str) -> Result<Vec<CredentialConfig>, StoreError> {
    let keys: Vec<KeyEntry> = serde_json::from_str(raw)?;
    Ok(keys
        .into_iter()
        .map(|key| CredentialConfig { provider, key })
        .collect())
}

// ============================================================================
// Loading & Validation
// ============================================================================

impl Config {
    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        default_config_path()
    }

    /// Loads configuration from the default path.
    pub fn load() -> Result<Self, StoreError> {
        Self::load_from(&Self::default_path())
    }

    /// Loads configuration from a specific path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let config: Config = read_json(path)?;
        info!(path = %path.display(), credentials = config.credentials.len(), "Loaded configuration");
        Ok(config)
    }

    /// Saves configuration to a specific path (mode 0600).
    pub fn save_to(&self, path: &Path) -> Result<(), StoreError> {
        write_json(path, self)?;
        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Appends credentials from the key-list environment variables.
    ///
    /// A variable that does not parse is logged and skipped.
    pub fn merge_env_credentials(&mut self) {
        for (provider, var) in [
            (Provider::SearchAd, SEARCHAD_KEYS_ENV),
            (Provider::OpenApi, OPENAPI_KEYS_ENV),
        ] {
            let Ok(raw) = std::env::var(var) else {
                continue;
            };
            match parse_key_list(provider, &raw) {
                Ok(keys) => {
                    debug!(var, count = keys.len(), "Loaded credentials from environment");
                    self.credentials.extend(keys);
                }
                Err(e) => warn!(var, error = %e, "Ignoring unparsable key list"),
            }
        }
    }

    /// Every configured credential as a store record.
    pub fn new_credentials(&self) -> Vec<NewCredential> {
        self.credentials
            .iter()
            .map(CredentialConfig::to_new_credential)
            .collect()
    }

    /// Checks the configuration, reporting every problem at once.
    pub fn validate(&self) -> Result<(), StoreError> {
        let mut problems = Vec::new();

        for entry in &self.credentials {
            problems.extend(entry.problems());
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &self.credentials {
            if !seen.insert((entry.provider, entry.key.label.trim().to_string())) {
                problems.push(format!(
                    "{}/{}: duplicate label",
                    entry.provider,
                    entry.key.label.trim()
                ));
            }
        }

        let rl = &self.rate_limit;
        if rl.global_slots.related == 0 || rl.global_slots.docs == 0 {
            problems.push("rate_limit.global_slots must be at least 1".to_string());
        }
        if !(rl.token_bucket.max_tokens >= 1.0) {
            problems.push("rate_limit.token_bucket.max_tokens must be at least 1".to_string());
        }
        if rl.token_bucket.refill_interval_ms == 0 {
            problems.push("rate_limit.token_bucket.refill_interval_ms must be positive".to_string());
        }
        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.queue.default_max_attempts == 0 {
            problems.push("queue.default_max_attempts must be at least 1".to_string());
        }
        if self.queue.related_batch_size == 0 || self.queue.related_batch_size > 5 {
            problems.push("queue.related_batch_size must be between 1 and 5".to_string());
        }
        if self.queue.docs_batch_size == 0 || self.queue.docs_concurrency == 0 {
            problems.push("queue.docs_batch_size and docs_concurrency must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Config(problems.join("; ")))
        }
    }
}
