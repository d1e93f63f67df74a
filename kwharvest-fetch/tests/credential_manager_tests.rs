//! Credential manager behaviour against the in-memory store.

use chrono::{DateTime, Duration, TimeZone, Utc};
use kwharvest_core::{
    Clock, Credential, CredentialGuard, CredentialPatch, CredentialStatus, CredentialStore,
    ManualClock, NewCredential, Provider,
};
use kwharvest_fetch::{CredentialManager, CredentialSettings};
use kwharvest_store::MemoryStore;
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

struct Fixture {
    store: Arc<MemoryStore>,
    clock: ManualClock,
    manager: CredentialManager,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(t0());
        let manager = CredentialManager::new(
            store.clone(),
            Arc::new(clock.clone()),
            CredentialSettings::default(),
        );
        Self {
            store,
            clock,
            manager,
        }
    }

    async fn add(&self, provider: Provider, label: &str, qps: f64, quota: u32) -> Credential {
        let new = NewCredential {
            provider,
            label: label.to_string(),
            key_id: format!("{label}-id"),
            key_secret: format!("{label}-secret"),
            customer_id: (provider == Provider::SearchAd).then(|| "1001".to_string()),
            qps_limit: qps,
            daily_quota: quota,
        };
        self.manager
            .sync_credentials(&[new])
            .await
            .unwrap()
            .remove(0)
    }

    async fn set(&self, id: i64, patch: CredentialPatch) {
        assert!(
            self.store
                .update_credential(id, &CredentialGuard::none(), &patch)
                .await
                .unwrap()
        );
        self.manager.invalidate_cache();
    }

    async fn get(&self, id: i64) -> Credential {
        self.store.get_credential(id).await.unwrap().unwrap()
    }
}

// ============================================================================
// Selection
// ============================================================================

#[tokio::test]
async fn test_selection_prefers_lower_usage_ratio() {
    let fx = Fixture::new();
    let busy = fx.add(Provider::OpenApi, "busy", 3.0, 100).await;
    let idle = fx.add(Provider::OpenApi, "idle", 3.0, 100).await;

    fx.set(busy.id, CredentialPatch { used_today: Some(50), ..Default::default() }).await;
    fx.set(idle.id, CredentialPatch { used_today: Some(10), ..Default::default() }).await;

    let selected = fx.manager.select_credential(Provider::OpenApi).await.unwrap().unwrap();
    assert_eq!(selected.id, idle.id);
}

#[tokio::test]
async fn test_selection_tie_breaks_on_tokens() {
    let fx = Fixture::new();
    let low = fx.add(Provider::OpenApi, "low", 3.0, 100).await;
    let high = fx.add(Provider::OpenApi, "high", 3.0, 100).await;

    fx.set(low.id, CredentialPatch { window_tokens: Some(2.0), ..Default::default() }).await;
    fx.set(high.id, CredentialPatch { window_tokens: Some(5.0), ..Default::default() }).await;

    let selected = fx.manager.select_credential(Provider::OpenApi).await.unwrap().unwrap();
    assert_eq!(selected.id, high.id);
}

#[tokio::test]
async fn test_exhausted_quota_is_never_selected() {
    let fx = Fixture::new();
    let only = fx.add(Provider::SearchAd, "only", 0.5, 10).await;
    fx.set(only.id, CredentialPatch { used_today: Some(10), ..Default::default() }).await;

    assert!(fx.get(only.id).await.window_tokens >= 1.0);
    assert!(fx.manager.select_credential(Provider::SearchAd).await.unwrap().is_none());
}

#[tokio::test]
async fn test_selection_requires_a_whole_token() {
    let fx = Fixture::new();
    let only = fx.add(Provider::OpenApi, "only", 3.0, 100).await;
    fx.set(only.id, CredentialPatch { window_tokens: Some(0.5), ..Default::default() }).await;

    assert!(fx.manager.select_credential(Provider::OpenApi).await.unwrap().is_none());
}

#[tokio::test]
async fn test_selection_is_scoped_to_provider() {
    let fx = Fixture::new();
    fx.add(Provider::OpenApi, "docs", 3.0, 100).await;

    assert!(fx.manager.select_credential(Provider::SearchAd).await.unwrap().is_none());
    assert!(fx.manager.has_usable(Provider::OpenApi).await.unwrap());
}

#[tokio::test]
async fn test_cached_selection_is_revalidated() {
    let fx = Fixture::new();
    let first = fx.add(Provider::OpenApi, "a", 3.0, 100).await;
    let second = fx.add(Provider::OpenApi, "b", 3.0, 100).await;
    fx.set(second.id, CredentialPatch { used_today: Some(1), ..Default::default() }).await;

    let selected = fx.manager.select_credential(Provider::OpenApi).await.unwrap().unwrap();
    assert_eq!(selected.id, first.id);

    // Disabled behind the manager's back; the cache must not hand it out.
    fx.store
        .update_credential(
            first.id,
            &CredentialGuard::none(),
            &CredentialPatch {
                status: Some(CredentialStatus::Disabled),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let selected = fx.manager.select_credential(Provider::OpenApi).await.unwrap().unwrap();
    assert_eq!(selected.id, second.id);
}

// ============================================================================
// Usage and failures
// ============================================================================

#[tokio::test]
async fn test_record_usage_consumes_token_and_quota() {
    let fx = Fixture::new();
    let cred = fx.add(Provider::OpenApi, "a", 3.0, 100).await;
    assert!((cred.window_tokens - 6.0).abs() < f64::EPSILON);

    fx.manager.record_usage(cred.id, 1.0).await.unwrap();
    let after = fx.get(cred.id).await;
    assert!((after.window_tokens - 5.0).abs() < f64::EPSILON);
    assert_eq!(after.used_today, 1);
    assert_eq!(after.last_used_at, Some(t0()));

    fx.manager.record_usage(cred.id, 10.0).await.unwrap();
    let after = fx.get(cred.id).await;
    assert!(after.window_tokens.abs() < f64::EPSILON);
    assert_eq!(after.used_today, 2);
}

#[tokio::test]
async fn test_record_usage_unknown_credential() {
    let fx = Fixture::new();
    assert!(fx.manager.record_usage(99, 1.0).await.is_err());
}

#[tokio::test]
async fn test_rate_limit_cooldown_is_idempotent() {
    let fx = Fixture::new();
    let cred = fx.add(Provider::SearchAd, "a", 0.5, 8000).await;

    let status = fx.manager.record_failure(cred.id, 429, "slow down").await.unwrap();
    assert_eq!(status, CredentialStatus::Cooling);
    let first = fx.get(cred.id).await;
    assert_eq!(first.cooldown_until, Some(t0() + Duration::seconds(300)));

    fx.clock.advance(Duration::seconds(10));
    fx.manager.record_failure(cred.id, 429, "slow down").await.unwrap();
    let second = fx.get(cred.id).await;
    assert_eq!(second.status, CredentialStatus::Cooling);
    assert_eq!(second.cooldown_until, Some(fx.clock.now() + Duration::seconds(300)));
    assert!(second.cooldown_until.unwrap() > fx.clock.now());
    assert_eq!(second.last_error.as_deref(), Some("slow down"));

    assert!(fx.manager.select_credential(Provider::SearchAd).await.unwrap().is_none());
}

#[tokio::test]
async fn test_openapi_cooldown_is_shorter() {
    let fx = Fixture::new();
    let cred = fx.add(Provider::OpenApi, "a", 3.0, 100).await;

    fx.manager.record_failure(cred.id, 429, "limit").await.unwrap();
    assert_eq!(
        fx.get(cred.id).await.cooldown_until,
        Some(t0() + Duration::seconds(60))
    );
}

#[tokio::test]
async fn test_auth_rejection_disables_until_manual_reactivation() {
    let fx = Fixture::new();
    let cred = fx.add(Provider::OpenApi, "a", 3.0, 100).await;

    let status = fx.manager.record_failure(cred.id, 401, "bad key").await.unwrap();
    assert_eq!(status, CredentialStatus::Disabled);
    assert_eq!(
        fx.get(cred.id).await.cooldown_until,
        Some(t0() + Duration::hours(1))
    );

    // A later 429 does not turn a disabled credential back into a cooling one.
    let status = fx.manager.record_failure(cred.id, 429, "limit").await.unwrap();
    assert_eq!(status, CredentialStatus::Disabled);
    assert_eq!(fx.get(cred.id).await.last_error.as_deref(), Some("limit"));

    fx.clock.advance(Duration::hours(2));
    assert_eq!(fx.manager.reactivate_expired_cooldowns().await.unwrap(), 0);
    assert_eq!(fx.get(cred.id).await.status, CredentialStatus::Disabled);

    let reactivated = fx.manager.reactivate(cred.id).await.unwrap();
    assert_eq!(reactivated.status, CredentialStatus::Active);
    assert_eq!(reactivated.cooldown_until, None);
}

#[tokio::test]
async fn test_other_failures_only_record_the_error() {
    let fx = Fixture::new();
    let cred = fx.add(Provider::OpenApi, "a", 3.0, 100).await;

    let status = fx.manager.record_failure(cred.id, 500, "boom").await.unwrap();
    assert_eq!(status, CredentialStatus::Active);

    let after = fx.get(cred.id).await;
    assert_eq!(after.status, CredentialStatus::Active);
    assert_eq!(after.cooldown_until, None);
    assert_eq!(after.last_error.as_deref(), Some("boom"));
}

// ============================================================================
// Maintenance
// ============================================================================

#[tokio::test]
async fn test_refill_is_monotonic_and_capped() {
    let fx = Fixture::new();
    let cred = fx.add(Provider::OpenApi, "a", 3.0, 100).await;
    fx.set(cred.id, CredentialPatch { window_tokens: Some(0.0), ..Default::default() }).await;

    fx.clock.advance(Duration::milliseconds(500));
    fx.manager.refill().await.unwrap();
    let tokens = fx.get(cred.id).await.window_tokens;
    assert!((tokens - 1.5).abs() < 1e-9, "{tokens}");

    // Calling again without elapsed time changes nothing.
    assert_eq!(fx.manager.refill().await.unwrap(), 0);
    assert!((fx.get(cred.id).await.window_tokens - 1.5).abs() < 1e-9);

    // An irregular, long gap never overshoots the cap.
    fx.clock.advance(Duration::seconds(45));
    fx.manager.refill().await.unwrap();
    let after = fx.get(cred.id).await;
    assert!((after.window_tokens - 6.0).abs() < f64::EPSILON);
    assert_eq!(after.refilled_at, fx.clock.now());

    fx.clock.advance(Duration::seconds(1));
    fx.manager.refill().await.unwrap();
    assert!((fx.get(cred.id).await.window_tokens - 6.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_refill_skips_cooling_credentials() {
    let fx = Fixture::new();
    let cred = fx.add(Provider::SearchAd, "a", 0.5, 8000).await;
    fx.set(cred.id, CredentialPatch { window_tokens: Some(0.0), ..Default::default() }).await;
    fx.manager.record_failure(cred.id, 429, "limit").await.unwrap();

    fx.clock.advance(Duration::seconds(10));
    assert_eq!(fx.manager.refill().await.unwrap(), 0);
    assert!(fx.get(cred.id).await.window_tokens.abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_expired_cooldowns_are_reactivated() {
    let fx = Fixture::new();
    let cred = fx.add(Provider::SearchAd, "a", 0.5, 8000).await;
    fx.manager.record_failure(cred.id, 429, "limit").await.unwrap();

    fx.clock.advance(Duration::seconds(299));
    assert_eq!(fx.manager.reactivate_expired_cooldowns().await.unwrap(), 0);

    fx.clock.advance(Duration::seconds(2));
    assert_eq!(fx.manager.reactivate_expired_cooldowns().await.unwrap(), 1);

    let after = fx.get(cred.id).await;
    assert_eq!(after.status, CredentialStatus::Active);
    assert_eq!(after.cooldown_until, None);
    assert!(fx.manager.select_credential(Provider::SearchAd).await.unwrap().is_some());
}

#[tokio::test]
async fn test_daily_reset_only_touches_active_credentials() {
    let fx = Fixture::new();
    let active = fx.add(Provider::OpenApi, "a", 3.0, 100).await;
    let cooling = fx.add(Provider::OpenApi, "b", 3.0, 100).await;
    fx.set(active.id, CredentialPatch { used_today: Some(100), ..Default::default() }).await;
    fx.set(cooling.id, CredentialPatch { used_today: Some(40), ..Default::default() }).await;
    fx.manager.record_failure(cooling.id, 429, "limit").await.unwrap();

    assert_eq!(fx.manager.reset_daily_quota().await.unwrap(), 1);
    assert_eq!(fx.get(active.id).await.used_today, 0);
    assert_eq!(fx.get(cooling.id).await.used_today, 40);
}

#[tokio::test]
async fn test_sync_keeps_counters_and_clamps_tokens() {
    let fx = Fixture::new();
    let cred = fx.add(Provider::OpenApi, "a", 3.0, 100).await;
    fx.manager.record_usage(cred.id, 1.0).await.unwrap();

    let resynced = fx.add(Provider::OpenApi, "a", 1.0, 50).await;
    assert_eq!(resynced.id, cred.id);
    assert_eq!(resynced.used_today, 1);
    assert_eq!(resynced.daily_quota, 50);
    assert!((resynced.window_tokens - 2.0).abs() < f64::EPSILON);
    assert!((fx.get(cred.id).await.window_refill_rate - 1.0).abs() < f64::EPSILON);
}

// ============================================================================
// Reporting
// ============================================================================

#[tokio::test]
async fn test_status_and_provider_health() {
    let fx = Fixture::new();
    let a = fx.add(Provider::OpenApi, "a", 3.0, 100).await;
    let b = fx.add(Provider::OpenApi, "b", 3.0, 100).await;
    fx.add(Provider::SearchAd, "c", 0.5, 8000).await;
    fx.manager.record_usage(a.id, 1.0).await.unwrap();
    fx.manager.record_failure(b.id, 403, "forbidden").await.unwrap();

    let reports = fx.manager.credential_status().await.unwrap();
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].credential.provider, Provider::OpenApi);
    assert!(reports[0].can_use);
    assert!(!reports[1].can_use);
    assert!((reports[0].usage_ratio - 0.01).abs() < 1e-9);

    let health = fx.manager.provider_health().await.unwrap();
    let openapi = health.iter().find(|h| h.provider == Provider::OpenApi).unwrap();
    assert!(openapi.available);
    assert_eq!(openapi.keys, 2);
    assert_eq!(openapi.active_keys, 1);
    assert_eq!(openapi.disabled_keys, 1);
    assert_eq!(openapi.daily_quota_used, 1);
    assert_eq!(openapi.daily_quota_total, 200);

    let searchad = health.iter().find(|h| h.provider == Provider::SearchAd).unwrap();
    assert_eq!(searchad.keys, 1);
    assert!(searchad.available);
}

#[tokio::test]
async fn test_report_never_serializes_the_secret() {
    let fx = Fixture::new();
    fx.add(Provider::OpenApi, "a", 3.0, 100).await;

    let reports = fx.manager.credential_status().await.unwrap();
    let json = serde_json::to_string(&reports).unwrap();
    assert!(!json.contains("a-secret"));
    assert!(json.contains("\"can_use\":true"));
}
