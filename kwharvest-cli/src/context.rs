//! Wiring of stores, credential management and the scheduler from config.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kwharvest_core::{
    Clock, Credential, CredentialStore, DocCountApi, Provider, RecordStore, RelatedKeywordsApi,
    SystemClock,
};
use kwharvest_fetch::{
    AdmissionController, CredentialManager, CredentialSettings, HttpClient, RetryStrategy,
    UpstreamCaller,
};
use kwharvest_providers::{OpenApiClient, SearchAdClient};
use kwharvest_queue::{
    Collector, CountDocsHandler, FetchRelatedHandler, HandlerContext, Handlers, Scheduler,
    SchedulerSettings,
};
use kwharvest_store::{Config, QueueConfig, RateLimitConfig, RetryConfig, SqliteStore};
use tracing::{debug, info};

use crate::Cli;

/// Upstream hosts the HTTP client may talk to.
const UPSTREAM_DOMAIN: &str = "naver.com";

/// Loads, extends from the environment, and validates the configuration.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load().context("loading config")?,
    };
    config.merge_env_credentials();
    config.validate()?;
    Ok(config)
}

/// Credential manager settings from the rate-limit section.
pub fn credential_settings(rate_limit: &RateLimitConfig) -> CredentialSettings {
    CredentialSettings {
        max_tokens: rate_limit.token_bucket.max_tokens,
        searchad_cooldown: chrono_duration(rate_limit.cooldown.for_provider(Provider::SearchAd)),
        openapi_cooldown: chrono_duration(rate_limit.cooldown.for_provider(Provider::OpenApi)),
        disable_duration: chrono_duration(Duration::from_secs(rate_limit.disable_secs)),
        selection_cache_ttl: Duration::from_millis(rate_limit.selection_cache_ttl_ms),
        related_slots: rate_limit.global_slots.related,
        docs_slots: rate_limit.global_slots.docs,
    }
}

/// Upstream retry policy from the retry section.
pub fn retry_strategy(retry: &RetryConfig) -> RetryStrategy {
    RetryStrategy::new(retry.max_attempts)
        .with_base_delay(Duration::from_millis(retry.base_delay_ms))
        .with_max_delay(Duration::from_millis(retry.max_delay_ms))
        .with_jitter(retry.jitter)
}

/// Scheduler settings from the queue section.
pub fn scheduler_settings(queue: &QueueConfig) -> SchedulerSettings {
    SchedulerSettings {
        poll_interval: Duration::from_millis(queue.poll_interval_ms),
        base_delay: Duration::from_millis(queue.job_base_delay_ms),
        max_delay: Duration::from_millis(queue.job_max_delay_ms),
        default_max_attempts: queue.default_max_attempts,
        related_batch_size: queue.related_batch_size,
        docs_batch_size: queue.docs_batch_size,
        stale_after: chrono_duration(Duration::from_secs(queue.stale_after_secs)),
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// Everything a command needs, built once per invocation.
pub struct App {
    /// The loaded configuration.
    pub config: Config,
    /// Credential selection and accounting.
    pub credentials: Arc<CredentialManager>,
    /// Global admission control.
    pub admission: Arc<AdmissionController>,
    /// The job scheduler.
    pub scheduler: Arc<Scheduler>,
    /// Collection trigger and seeding.
    pub collector: Collector,
    /// The record store, for read-only queries.
    pub store: Arc<dyn RecordStore>,
}

impl App {
    /// Loads the configuration named on the command line and opens the database.
    pub fn open(cli: &Cli) -> Result<Self> {
        let config = load_config(cli.config.as_deref())?;
        let path = config.database.resolved_path();
        let store = Arc::new(
            SqliteStore::open(&path)
                .with_context(|| format!("opening database {}", path.display()))?,
        );
        Self::build(config, store, Arc::new(SystemClock))
    }

    /// Wires every component over `store`.
    pub fn build<S>(config: Config, store: Arc<S>, clock: Arc<dyn Clock>) -> Result<Self>
    where
        S: RecordStore + 'static,
    {
        let credential_store: Arc<dyn CredentialStore> = store.clone();
        let records: Arc<dyn RecordStore> = store;

        let credentials = Arc::new(CredentialManager::new(
            credential_store,
            Arc::clone(&clock),
            credential_settings(&config.rate_limit),
        ));
        let admission = Arc::new(
            AdmissionController::new(Arc::clone(&credentials))
                .with_poll_interval(Duration::from_millis(config.rate_limit.admission_poll_ms)),
        );
        let caller = Arc::new(UpstreamCaller::new(
            Arc::clone(&admission),
            retry_strategy(&config.retry),
        ));

        let http = HttpClient::with_timeout(Duration::from_secs(config.retry.request_timeout_secs))?
            .allow_domains(vec![UPSTREAM_DOMAIN.to_string()]);
        let related_api: Arc<dyn RelatedKeywordsApi> = Arc::new(SearchAdClient::new(http.clone()));
        let docs_api: Arc<dyn DocCountApi> = Arc::new(OpenApiClient::new(http));

        let ctx = HandlerContext {
            store: Arc::clone(&records),
            caller,
            clock: Arc::clone(&clock),
        };
        let handlers = Handlers::new(
            FetchRelatedHandler::new(ctx.clone(), related_api),
            CountDocsHandler::new(ctx, docs_api).with_concurrency(config.queue.docs_concurrency),
        );

        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&records),
            handlers,
            Arc::clone(&clock),
            scheduler_settings(&config.queue),
        ));
        let collector = Collector::new(
            Arc::clone(&records),
            Arc::clone(&credentials),
            Arc::clone(&scheduler),
            clock,
        );

        debug!(credentials = config.credentials.len(), "Application wired");
        Ok(Self {
            config,
            credentials,
            admission,
            scheduler,
            collector,
            store: records,
        })
    }

    /// Upserts the configured credentials into the store.
    pub async fn sync_credentials(&self) -> Result<Vec<Credential>> {
        let synced = self
            .credentials
            .sync_credentials(&self.config.new_credentials())
            .await?;
        info!(count = synced.len(), "Credentials in sync with config");
        Ok(synced)
    }
}
