//! Token-bucket credential manager.
//!
//! Owns credential selection, refill, quota accounting and the status
//! transitions driven by upstream errors. Every mutation of a credential row
//! goes through [`CredentialStore::update_credential`] as one conditional
//! single-row update; the selection cache is a per-process shortcut that is
//! re-validated against the store before use.

use chrono::{DateTime, Duration, Utc};
use kwharvest_core::{
    Clock, CoreError, Credential, CredentialFilter, CredentialGuard, CredentialPatch,
    CredentialStatus, CredentialStore, NewCredential, OperationClass, Provider,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::slots::{GlobalSlots, SlotPermit, SlotUsage};

/// How often a lost compare-and-set on usage accounting is retried.
const USAGE_CAS_ATTEMPTS: usize = 5;

// ============================================================================
// Settings
// ============================================================================

/// Tunables of the credential manager.
#[derive(Debug, Clone)]
pub struct CredentialSettings {
    /// Bucket capacity multiplier: capacity is `max_tokens × qps_limit`.
    pub max_tokens: f64,
    /// Cooldown after a 429 from the search-ad provider.
    pub searchad_cooldown: Duration,
    /// Cooldown after a 429 from the open-API provider.
    pub openapi_cooldown: Duration,
    /// How far `cooldown_until` is pushed when a credential is disabled.
    pub disable_duration: Duration,
    /// Lifetime of a cached selection.
    pub selection_cache_ttl: std::time::Duration,
    /// Global slot ceiling for related-keyword calls.
    pub related_slots: usize,
    /// Global slot ceiling for document-count calls.
    pub docs_slots: usize,
}

impl CredentialSettings {
    /// Cooldown applied to a provider's credential after a 429.
    pub fn cooldown_for(&self, provider: Provider) -> Duration {
        match provider {
            Provider::SearchAd => self.searchad_cooldown,
            Provider::OpenApi => self.openapi_cooldown,
        }
    }
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            max_tokens: 2.0,
            searchad_cooldown: Duration::seconds(300),
            openapi_cooldown: Duration::seconds(60),
            disable_duration: Duration::hours(1),
            selection_cache_ttl: std::time::Duration::from_secs(1),
            related_slots: 4,
            docs_slots: 10,
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// A credential with its derived selection state.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialReport {
    /// The stored credential (secret omitted when serialized).
    #[serde(flatten)]
    pub credential: Credential,
    /// Tokens usable right now.
    pub available_tokens: f64,
    /// Whether selection would consider this credential.
    pub can_use: bool,
    /// Share of the daily quota consumed.
    pub usage_ratio: f64,
}

/// Health summary of one provider's credentials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    /// Provider.
    pub provider: Provider,
    /// At least one credential can be used right now.
    pub available: bool,
    /// Number of credentials.
    pub keys: usize,
    /// Credentials in `active` status.
    pub active_keys: usize,
    /// Credentials in `cooling` status.
    pub cooling_keys: usize,
    /// Credentials in `disabled` status.
    pub disabled_keys: usize,
    /// Calls made today across all credentials.
    pub daily_quota_used: u64,
    /// Sum of daily quotas.
    pub daily_quota_total: u64,
}

#[derive(Debug, Clone, Copy)]
struct CachedSelection {
    credential_id: i64,
    cached_at: Instant,
}

// ============================================================================
// Credential Manager
// ============================================================================

/// Selects credentials and keeps their token buckets, quotas and health.
pub struct CredentialManager {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    settings: CredentialSettings,
    slots: GlobalSlots,
    cache: Mutex<HashMap<Provider, CachedSelection>>,
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("clock", &self.clock)
            .field("settings", &self.settings)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl CredentialManager {
    /// Creates a manager over `store`.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        settings: CredentialSettings,
    ) -> Self {
        let slots = GlobalSlots::new(settings.related_slots, settings.docs_slots);
        Self {
            store,
            clock,
            settings,
            slots,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The manager's settings.
    pub fn settings(&self) -> &CredentialSettings {
        &self.settings
    }

    /// Current time as seen by the manager.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<Provider, CachedSelection>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops every cached selection.
    pub fn invalidate_cache(&self) {
        self.cache().clear();
    }

    // ------------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------------

    /// Picks the usable credential with the lowest quota usage ratio.
    ///
    /// Ties go to the credential with more available tokens. Returns `None`
    /// when no credential of the provider is active, out of cooldown, under
    /// quota and holding at least one token.
    pub async fn select_credential(
        &self,
        provider: Provider,
    ) -> Result<Option<Credential>, CoreError> {
        let now = self.clock.now();
        let max_tokens = self.settings.max_tokens;

        if let Some(cached) = self.cached_selection(provider).await? {
            if cached.is_usable(now, max_tokens) {
                return Ok(Some(cached));
            }
            self.cache().remove(&provider);
        }

        let mut candidates: Vec<Credential> = self
            .store
            .get_credentials(
                CredentialFilter::provider(provider).with_status(CredentialStatus::Active),
            )
            .await?
            .into_iter()
            .filter(|c| c.is_usable(now, max_tokens))
            .collect();

        candidates.sort_by(|a, b| {
            a.usage_ratio().total_cmp(&b.usage_ratio()).then_with(|| {
                b.available_tokens(max_tokens)
                    .total_cmp(&a.available_tokens(max_tokens))
            })
        });

        let Some(selected) = candidates.into_iter().next() else {
            debug!(provider = %provider, "No usable credential");
            return Ok(None);
        };

        self.cache().insert(
            provider,
            CachedSelection {
                credential_id: selected.id,
                cached_at: Instant::now(),
            },
        );
        Ok(Some(selected))
    }

    /// Loads the cached credential for a provider while the entry is fresh.
    async fn cached_selection(&self, provider: Provider) -> Result<Option<Credential>, CoreError> {
        let entry = self.cache().get(&provider).copied();
        let Some(entry) = entry else {
            return Ok(None);
        };
        if entry.cached_at.elapsed() >= self.settings.selection_cache_ttl {
            self.cache().remove(&provider);
            return Ok(None);
        }
        self.store.get_credential(entry.credential_id).await
    }

    /// Returns true if a credential of the provider could be selected now.
    pub async fn has_usable(&self, provider: Provider) -> Result<bool, CoreError> {
        Ok(self.select_credential(provider).await?.is_some())
    }

    // ------------------------------------------------------------------------
    // Accounting
    // ------------------------------------------------------------------------

    /// Consumes `tokens` and counts one call against the daily quota.
    ///
    /// Tokens never go below zero. The update is retried a few times if the
    /// row changed between read and write.
    #[instrument(skip(self))]
    pub async fn record_usage(&self, credential_id: i64, tokens: f64) -> Result<(), CoreError> {
        for _ in 0..USAGE_CAS_ATTEMPTS {
            let credential = self.load(credential_id).await?;
            let now = self.clock.now();
            let patch = CredentialPatch {
                window_tokens: Some((credential.window_tokens - tokens).max(0.0)),
                used_today: Some(credential.used_today.saturating_add(1)),
                last_used_at: Some(now),
                ..CredentialPatch::default()
            };

            let guard = CredentialGuard::counters_of(&credential);
            if self
                .store
                .update_credential(credential_id, &guard, &patch)
                .await?
            {
                self.invalidate_cache();
                debug!(
                    credential_id,
                    used_today = credential.used_today.saturating_add(1),
                    "Recorded credential usage"
                );
                return Ok(());
            }
        }

        self.invalidate_cache();
        Err(CoreError::Conflict(format!(
            "credential {credential_id} kept changing while recording usage"
        )))
    }

    /// Degrades a credential according to an upstream HTTP status.
    ///
    /// 429 puts it in cooldown, 401/403 disables it, anything else only
    /// records the message. A 429 never re-enables a disabled credential.
    /// Returns the resulting status.
    #[instrument(skip(self, message))]
    pub async fn record_failure(
        &self,
        credential_id: i64,
        http_status: u16,
        message: &str,
    ) -> Result<CredentialStatus, CoreError> {
        let credential = self.load(credential_id).await?;
        let now = self.clock.now();

        let mut patch = CredentialPatch {
            last_error: Some(Some(message.to_string())),
            ..CredentialPatch::default()
        };
        let status = match http_status {
            429 if credential.status != CredentialStatus::Disabled => {
                patch.status = Some(CredentialStatus::Cooling);
                patch.cooldown_until =
                    Some(Some(now + self.settings.cooldown_for(credential.provider)));
                CredentialStatus::Cooling
            }
            401 | 403 => {
                patch.status = Some(CredentialStatus::Disabled);
                patch.cooldown_until = Some(Some(now + self.settings.disable_duration));
                CredentialStatus::Disabled
            }
            _ => credential.status,
        };

        self.store
            .update_credential(credential_id, &CredentialGuard::none(), &patch)
            .await?;
        self.invalidate_cache();

        warn!(
            credential_id,
            provider = %credential.provider,
            label = %credential.label,
            http_status,
            status = %status,
            "Credential failure recorded"
        );
        Ok(status)
    }

    // ------------------------------------------------------------------------
    // Periodic maintenance
    // ------------------------------------------------------------------------

    /// Adds `window_refill_rate × elapsed` tokens to every active credential
    /// outside cooldown, capped at `max_tokens × qps_limit`.
    ///
    /// Elapsed time is measured per credential from its last refill, so
    /// irregular invocation never overshoots. Returns the number refilled.
    pub async fn refill(&self) -> Result<u64, CoreError> {
        let now = self.clock.now();
        let credentials = self
            .store
            .get_credentials(CredentialFilter::all().with_status(CredentialStatus::Active))
            .await?;

        let mut refilled = 0;
        for credential in credentials {
            if credential.in_cooldown(now) {
                continue;
            }
            let elapsed_ms = (now - credential.refilled_at).num_milliseconds();
            if elapsed_ms <= 0 {
                continue;
            }

            #[allow(clippy::cast_precision_loss)]
            let elapsed = elapsed_ms as f64 / 1000.0;
            let cap = credential.token_cap(self.settings.max_tokens);
            let tokens = (credential.window_tokens + credential.window_refill_rate * elapsed)
                .min(cap)
                .max(credential.window_tokens.min(cap));

            let guard = CredentialGuard {
                status: Some(CredentialStatus::Active),
                window_tokens: Some(credential.window_tokens),
                used_today: None,
            };
            let patch = CredentialPatch {
                window_tokens: Some(tokens),
                refilled_at: Some(now),
                ..CredentialPatch::default()
            };
            if self
                .store
                .update_credential(credential.id, &guard, &patch)
                .await?
            {
                refilled += 1;
            }
        }

        if refilled > 0 {
            self.invalidate_cache();
        }
        Ok(refilled)
    }

    /// Zeroes `used_today` on every active credential. Returns the number reset.
    pub async fn reset_daily_quota(&self) -> Result<u64, CoreError> {
        let credentials = self
            .store
            .get_credentials(CredentialFilter::all().with_status(CredentialStatus::Active))
            .await?;

        let guard = CredentialGuard {
            status: Some(CredentialStatus::Active),
            ..CredentialGuard::none()
        };
        let patch = CredentialPatch {
            used_today: Some(0),
            ..CredentialPatch::default()
        };

        let mut reset = 0;
        for credential in credentials.iter().filter(|c| c.used_today > 0) {
            if self
                .store
                .update_credential(credential.id, &guard, &patch)
                .await?
            {
                reset += 1;
            }
        }

        self.invalidate_cache();
        info!(reset, "Daily quota reset");
        Ok(reset)
    }

    /// Returns cooling credentials whose cooldown has passed to `active`.
    ///
    /// Disabled credentials are left alone; see [`Self::reactivate`].
    pub async fn reactivate_expired_cooldowns(&self) -> Result<u64, CoreError> {
        let now = self.clock.now();
        let credentials = self
            .store
            .get_credentials(CredentialFilter::all().with_status(CredentialStatus::Cooling))
            .await?;

        let guard = CredentialGuard {
            status: Some(CredentialStatus::Cooling),
            ..CredentialGuard::none()
        };
        let patch = CredentialPatch {
            status: Some(CredentialStatus::Active),
            cooldown_until: Some(None),
            ..CredentialPatch::default()
        };

        let mut reactivated = 0;
        for credential in credentials.iter().filter(|c| !c.in_cooldown(now)) {
            if self
                .store
                .update_credential(credential.id, &guard, &patch)
                .await?
            {
                info!(
                    credential_id = credential.id,
                    label = %credential.label,
                    "Cooldown expired, credential active again"
                );
                reactivated += 1;
            }
        }

        if reactivated > 0 {
            self.invalidate_cache();
        }
        Ok(reactivated)
    }

    /// Manually returns a cooling or disabled credential to `active`.
    pub async fn reactivate(&self, credential_id: i64) -> Result<Credential, CoreError> {
        let credential = self.load(credential_id).await?;
        if credential.status == CredentialStatus::Active && credential.cooldown_until.is_none() {
            return Ok(credential);
        }

        let patch = CredentialPatch {
            status: Some(CredentialStatus::Active),
            cooldown_until: Some(None),
            ..CredentialPatch::default()
        };
        self.store
            .update_credential(credential_id, &CredentialGuard::none(), &patch)
            .await?;
        self.invalidate_cache();

        info!(
            credential_id,
            label = %credential.label,
            previous = %credential.status,
            "Credential reactivated"
        );
        self.load(credential_id).await
    }

    /// Upserts credentials from configuration on `(provider, label)`.
    ///
    /// New rows start active with a full bucket. Existing rows keep their
    /// counters; a bucket above the new capacity is clamped.
    pub async fn sync_credentials(
        &self,
        credentials: &[NewCredential],
    ) -> Result<Vec<Credential>, CoreError> {
        let now = self.clock.now();
        let mut synced = Vec::with_capacity(credentials.len());

        for new in credentials {
            let cap = self.settings.max_tokens * new.qps_limit;
            let mut credential = self.store.upsert_credential(new, cap, now).await?;

            if credential.window_tokens > cap {
                let patch = CredentialPatch {
                    window_tokens: Some(cap),
                    ..CredentialPatch::default()
                };
                if self
                    .store
                    .update_credential(credential.id, &CredentialGuard::counters_of(&credential), &patch)
                    .await?
                {
                    credential.window_tokens = cap;
                }
            }
            synced.push(credential);
        }

        self.invalidate_cache();
        info!(count = synced.len(), "Credentials synchronised");
        Ok(synced)
    }

    // ------------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------------

    /// Every credential with derived selection state, ordered by provider and label.
    pub async fn credential_status(&self) -> Result<Vec<CredentialReport>, CoreError> {
        let now = self.clock.now();
        let max_tokens = self.settings.max_tokens;
        let mut credentials = self.store.get_credentials(CredentialFilter::all()).await?;
        credentials.sort_by(|a, b| {
            a.provider
                .as_str()
                .cmp(b.provider.as_str())
                .then_with(|| a.label.cmp(&b.label))
        });

        Ok(credentials
            .into_iter()
            .map(|credential| CredentialReport {
                available_tokens: credential.available_tokens(max_tokens),
                can_use: credential.is_usable(now, max_tokens),
                usage_ratio: credential.usage_ratio(),
                credential,
            })
            .collect())
    }

    /// Health summary per provider.
    pub async fn provider_health(&self) -> Result<Vec<ProviderHealth>, CoreError> {
        let reports = self.credential_status().await?;

        Ok(Provider::all()
            .iter()
            .map(|&provider| {
                let mine: Vec<&CredentialReport> = reports
                    .iter()
                    .filter(|r| r.credential.provider == provider)
                    .collect();
                let count = |status: CredentialStatus| {
                    mine.iter()
                        .filter(|r| r.credential.status == status)
                        .count()
                };
                ProviderHealth {
                    provider,
                    available: mine.iter().any(|r| r.can_use),
                    keys: mine.len(),
                    active_keys: count(CredentialStatus::Active),
                    cooling_keys: count(CredentialStatus::Cooling),
                    disabled_keys: count(CredentialStatus::Disabled),
                    daily_quota_used: mine
                        .iter()
                        .map(|r| u64::from(r.credential.used_today))
                        .sum(),
                    daily_quota_total: mine
                        .iter()
                        .map(|r| u64::from(r.credential.daily_quota))
                        .sum(),
                }
            })
            .collect())
    }

    // ------------------------------------------------------------------------
    // Global slots
    // ------------------------------------------------------------------------

    /// Takes a global slot for the operation class. Never waits.
    pub fn acquire_global_slot(&self, operation: OperationClass) -> bool {
        self.slots.try_acquire(operation)
    }

    /// Gives a global slot back.
    pub fn release_global_slot(&self, operation: OperationClass) {
        self.slots.release(operation);
    }

    /// Takes a global slot released when the permit drops.
    pub fn try_slot_permit(&self, operation: OperationClass) -> Option<SlotPermit<'_>> {
        self.slots.try_permit(operation)
    }

    /// Occupancy of every operation class.
    pub fn slot_stats(&self) -> Vec<SlotUsage> {
        self.slots.usage()
    }

    async fn load(&self, credential_id: i64) -> Result<Credential, CoreError> {
        self.store
            .get_credential(credential_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("credential {credential_id}")))
    }
}
