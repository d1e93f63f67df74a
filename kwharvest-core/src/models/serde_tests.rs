//! Serde tests for core types.
//!
//! Stored rows and CLI JSON output depend on these exact spellings.

use chrono::Utc;

use crate::{
    Competition, Credential, CredentialStatus, Job, JobKind, JobPayload, JobStatus,
    KeywordStatus, OperationClass, Provider,
};

#[test]
fn test_provider_serde_lowercase() {
    let test_cases = vec![
        (r#""searchad""#, Provider::SearchAd),
        (r#""openapi""#, Provider::OpenApi),
    ];

    for (json, expected) in test_cases {
        let parsed: Provider = serde_json::from_str(json).unwrap();
        assert_eq!(parsed, expected, "Failed for {json}");
        assert_eq!(serde_json::to_string(&expected).unwrap(), json);
    }
}

#[test]
fn test_status_enums_snake_case() {
    assert_eq!(
        serde_json::to_string(&KeywordStatus::FetchedRel).unwrap(),
        r#""fetched_rel""#
    );
    assert_eq!(
        serde_json::to_string(&JobKind::CountDocs).unwrap(),
        r#""count_docs""#
    );
    assert_eq!(
        serde_json::to_string(&CredentialStatus::Cooling).unwrap(),
        r#""cooling""#
    );
    assert_eq!(
        serde_json::to_string(&OperationClass::Docs).unwrap(),
        r#""docs""#
    );
    assert_eq!(
        serde_json::to_string(&Competition::Medium).unwrap(),
        r#""medium""#
    );
}

#[test]
fn test_as_str_matches_serde() {
    for status in [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ] {
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, format!("\"{}\"", status.as_str()));
        assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
    }
}

#[test]
fn test_credential_secret_not_serialized() {
    let credential = Credential {
        id: 7,
        provider: Provider::SearchAd,
        label: "primary".to_string(),
        key_id: "license".to_string(),
        key_secret: "top-secret".to_string(),
        customer_id: Some("1234".to_string()),
        qps_limit: 0.5,
        daily_quota: 8000,
        used_today: 0,
        window_tokens: 1.0,
        window_refill_rate: 0.5,
        status: CredentialStatus::Active,
        cooldown_until: None,
        last_error: None,
        refilled_at: Utc::now(),
        last_used_at: None,
    };

    let json = serde_json::to_string(&credential).unwrap();
    assert!(!json.contains("top-secret"));
    assert!(json.contains(r#""provider":"searchad""#));
}

#[test]
fn test_job_type_field_name() {
    let now = Utc::now();
    let job = Job {
        id: 1,
        kind: JobKind::FetchRelated,
        payload: JobPayload::new(vec![1, 2]),
        status: JobStatus::Pending,
        attempts: 0,
        max_attempts: 3,
        scheduled_at: now,
        created_at: now,
        started_at: None,
        completed_at: None,
        error_message: None,
    };

    let value = serde_json::to_value(&job).unwrap();
    assert_eq!(value["type"], "fetch_related");
    assert_eq!(value["payload"]["keyword_ids"][1], 2);
}
