//! Credential types.
//!
//! This module contains types describing upstream API credentials:
//! - [`Provider`] - The two upstream services
//! - [`OperationClass`] - Coarse work categories with their own concurrency ceiling
//! - [`Credential`] - A provider-scoped key bundle with token-bucket and quota state
//! - [`CredentialPatch`] / [`CredentialGuard`] - Partial, conditional updates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

// ============================================================================
// Provider
// ============================================================================

/// Upstream services a credential can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Search advertising API (related keywords). Signed requests, needs a customer id.
    SearchAd,
    /// Open search API (document counts).
    OpenApi,
}

impl Provider {
    /// Returns the stable identifier used in storage and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchAd => "searchad",
            Self::OpenApi => "openapi",
        }
    }

    /// Returns the display name for this provider.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::SearchAd => "Search Ad",
            Self::OpenApi => "Open API",
        }
    }

    /// Returns all providers.
    pub fn all() -> &'static [Provider] {
        &[Self::SearchAd, Self::OpenApi]
    }

    /// Default queries-per-second for keys configured without one.
    pub fn default_qps(&self) -> f64 {
        match self {
            Self::SearchAd => 0.5,
            Self::OpenApi => 3.0,
        }
    }

    /// Default daily quota for keys configured without one.
    pub fn default_daily_quota(&self) -> u32 {
        match self {
            Self::SearchAd => 8_000,
            Self::OpenApi => 20_000,
        }
    }

    /// Returns true if credentials for this provider carry a customer id.
    pub fn requires_customer_id(&self) -> bool {
        matches!(self, Self::SearchAd)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "searchad" | "search_ad" => Ok(Self::SearchAd),
            "openapi" | "open_api" => Ok(Self::OpenApi),
            other => Err(CoreError::InvalidData(format!("unknown provider: {other}"))),
        }
    }
}

// ============================================================================
// Operation Class
// ============================================================================

/// Coarse category of upstream work, each with an independent concurrency ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    /// Related-keyword fetches.
    Related,
    /// Document-count lookups.
    Docs,
}

impl OperationClass {
    /// Returns the stable identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Related => "related",
            Self::Docs => "docs",
        }
    }

    /// Returns all operation classes.
    pub fn all() -> &'static [OperationClass] {
        &[Self::Related, Self::Docs]
    }

    /// The provider that serves this class of work.
    pub fn provider(&self) -> Provider {
        match self {
            Self::Related => Provider::SearchAd,
            Self::Docs => Provider::OpenApi,
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Credential Status
// ============================================================================

/// Health state of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    /// Eligible for selection.
    #[default]
    Active,
    /// Suspended after a rate-limit signal until `cooldown_until`.
    Cooling,
    /// Rejected by the upstream (401/403).
    Disabled,
}

impl CredentialStatus {
    /// Returns the stable identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cooling => "cooling",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "cooling" => Ok(Self::Cooling),
            "disabled" => Ok(Self::Disabled),
            other => Err(CoreError::InvalidData(format!(
                "unknown credential status: {other}"
            ))),
        }
    }
}

// ============================================================================
// Credential
// ============================================================================

/// A provider-scoped API key bundle with its own rate and quota state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Store-assigned identifier.
    pub id: i64,
    /// Upstream service.
    pub provider: Provider,
    /// Unique label within the provider.
    pub label: String,
    /// Public key material (client id / access license).
    pub key_id: String,
    /// Secret key material.
    #[serde(skip_serializing)]
    pub key_secret: String,
    /// Customer id, search-ad credentials only.
    pub customer_id: Option<String>,
    /// Queries per second allowed for this key.
    pub qps_limit: f64,
    /// Calls allowed per day.
    pub daily_quota: u32,
    /// Calls made today.
    pub used_today: u32,
    /// Current token-bucket level.
    pub window_tokens: f64,
    /// Tokens added per second.
    pub window_refill_rate: f64,
    /// Health state.
    pub status: CredentialStatus,
    /// End of the current cooldown or disablement.
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Last upstream error message.
    pub last_error: Option<String>,
    /// When the bucket was last refilled.
    pub refilled_at: DateTime<Utc>,
    /// When the credential last served a successful call.
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Bucket capacity: `max_tokens × qps_limit`.
    pub fn token_cap(&self, max_tokens: f64) -> f64 {
        max_tokens * self.qps_limit
    }

    /// Tokens usable right now, clamped to the bucket capacity.
    pub fn available_tokens(&self, max_tokens: f64) -> f64 {
        self.window_tokens.min(self.token_cap(max_tokens)).max(0.0)
    }

    /// Share of the daily quota already consumed.
    pub fn usage_ratio(&self) -> f64 {
        if self.daily_quota == 0 {
            return 1.0;
        }
        f64::from(self.used_today) / f64::from(self.daily_quota)
    }

    /// Returns true while a cooldown or disablement window is in effect.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }

    /// Returns true if today's quota is not exhausted.
    pub fn has_quota(&self) -> bool {
        self.used_today < self.daily_quota
    }

    /// Returns true if the credential may be selected for a call right now.
    pub fn is_usable(&self, now: DateTime<Utc>, max_tokens: f64) -> bool {
        self.status == CredentialStatus::Active
            && !self.in_cooldown(now)
            && self.has_quota()
            && self.available_tokens(max_tokens) >= 1.0
    }
}

/// A credential to be inserted or synchronised from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCredential {
    /// Upstream service.
    pub provider: Provider,
    /// Unique label within the provider.
    pub label: String,
    /// Public key material.
    pub key_id: String,
    /// Secret key material.
    pub key_secret: String,
    /// Customer id, search-ad credentials only.
    pub customer_id: Option<String>,
    /// Queries per second.
    pub qps_limit: f64,
    /// Calls allowed per day.
    pub daily_quota: u32,
}

// ============================================================================
// Partial Updates
// ============================================================================

/// Fields to change on a credential row. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialPatch {
    /// New token level.
    pub window_tokens: Option<f64>,
    /// New daily usage counter.
    pub used_today: Option<u32>,
    /// New status.
    pub status: Option<CredentialStatus>,
    /// New cooldown end (`Some(None)` clears it).
    pub cooldown_until: Option<Option<DateTime<Utc>>>,
    /// New last error (`Some(None)` clears it).
    pub last_error: Option<Option<String>>,
    /// New refill timestamp.
    pub refilled_at: Option<DateTime<Utc>>,
    /// New last-used timestamp.
    pub last_used_at: Option<DateTime<Utc>>,
}

impl CredentialPatch {
    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the patch to an in-memory credential.
    pub fn apply(&self, credential: &mut Credential) {
        if let Some(tokens) = self.window_tokens {
            credential.window_tokens = tokens;
        }
        if let Some(used) = self.used_today {
            credential.used_today = used;
        }
        if let Some(status) = self.status {
            credential.status = status;
        }
        if let Some(until) = self.cooldown_until {
            credential.cooldown_until = until;
        }
        if let Some(ref error) = self.last_error {
            credential.last_error.clone_from(error);
        }
        if let Some(at) = self.refilled_at {
            credential.refilled_at = at;
        }
        if let Some(at) = self.last_used_at {
            credential.last_used_at = Some(at);
        }
    }
}

/// Compare-and-set preconditions for a credential update.
///
/// Every `Some` field must equal the stored value for the update to apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialGuard {
    /// Expected status.
    pub status: Option<CredentialStatus>,
    /// Expected token level.
    pub window_tokens: Option<f64>,
    /// Expected daily usage counter.
    pub used_today: Option<u32>,
}

impl CredentialGuard {
    /// A guard that always matches.
    pub fn none() -> Self {
        Self::default()
    }

    /// A guard pinned to the token and usage state of a snapshot.
    pub fn counters_of(credential: &Credential) -> Self {
        Self {
            status: None,
            window_tokens: Some(credential.window_tokens),
            used_today: Some(credential.used_today),
        }
    }

    /// Returns true if the stored credential satisfies the guard.
    #[allow(clippy::float_cmp)]
    pub fn matches(&self, credential: &Credential) -> bool {
        self.status.is_none_or(|s| s == credential.status)
            && self
                .window_tokens
                .is_none_or(|t| t == credential.window_tokens)
            && self.used_today.is_none_or(|u| u == credential.used_today)
    }
}

/// Selection criteria for credential listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CredentialFilter {
    /// Only this provider.
    pub provider: Option<Provider>,
    /// Only this status.
    pub status: Option<CredentialStatus>,
}

impl CredentialFilter {
    /// Every credential.
    pub fn all() -> Self {
        Self::default()
    }

    /// Credentials of one provider.
    pub fn provider(provider: Provider) -> Self {
        Self {
            provider: Some(provider),
            status: None,
        }
    }

    /// Restricts the filter to a status.
    pub fn with_status(mut self, status: CredentialStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Returns true if the credential passes the filter.
    pub fn matches(&self, credential: &Credential) -> bool {
        self.provider.is_none_or(|p| p == credential.provider)
            && self.status.is_none_or(|s| s == credential.status)
    }
}
