//! CLI output formatting tests.
//!
//! Text output is checked without colors unless a test is about colors.

#[cfg(test)]
mod text_formatter_tests {
    use super::super::text::TextFormatter;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use kwharvest_core::{
        Credential, CredentialStatus, DocCounts, JobKind, Keyword, KeywordPage, KeywordSource,
        KeywordStatus, ListedKeyword, Provider, QueueStats,
    };
    use kwharvest_fetch::{CredentialReport, ProviderHealth};
    use kwharvest_queue::{CollectReport, ProcessingStats};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn credential(status: CredentialStatus) -> Credential {
        Credential {
            id: 7,
            provider: Provider::OpenApi,
            label: "team-a".to_string(),
            key_id: "id".to_string(),
            key_secret: "secret".to_string(),
            customer_id: None,
            qps_limit: 3.0,
            daily_quota: 100,
            used_today: 25,
            window_tokens: 4.0,
            window_refill_rate: 3.0,
            status,
            cooldown_until: None,
            last_error: None,
            refilled_at: now(),
            last_used_at: None,
        }
    }

    #[test]
    fn test_quota_bar_boundary_values() {
        let formatter = TextFormatter::new(false);

        let test_cases = vec![
            (0.0, "░░░░░░░░░░"),
            (25.0, "███░░░░░░░"),
            (50.0, "█████░░░░░"),
            (100.0, "██████████"),
            (140.0, "██████████"),
            (-5.0, "░░░░░░░░░░"),
        ];

        for (percent, expected) in test_cases {
            assert_eq!(formatter.quota_bar(percent), expected, "Failed for {percent}%");
        }
    }

    #[test]
    fn test_quota_bar_colors() {
        let formatter = TextFormatter::new(true);
        assert!(formatter.quota_bar(10.0).contains("\x1b[31m"));
        assert!(formatter.quota_bar(40.0).contains("\x1b[33m"));
        assert!(formatter.quota_bar(80.0).contains("\x1b[32m"));
    }

    #[test]
    fn test_credential_line_in_cooldown() {
        let formatter = TextFormatter::new(false);
        let mut c = credential(CredentialStatus::Cooling);
        c.cooldown_until = Some(now() + Duration::seconds(90));
        c.last_error = Some("HTTP 429".to_string());
        let report = CredentialReport {
            credential: c,
            available_tokens: 0.0,
            can_use: false,
            usage_ratio: 0.25,
        };

        let line = formatter.format_credential_line(&report, now());
        assert!(line.contains("team-a"));
        assert!(line.contains("cooling"));
        assert!(line.contains("until 09:01:30"));
        assert!(line.contains("████████░░"));
        assert!(!line.contains('\x1b'));
    }

    #[test]
    fn test_credential_line_shows_last_error_after_cooldown() {
        let formatter = TextFormatter::new(false);
        let mut c = credential(CredentialStatus::Disabled);
        c.cooldown_until = Some(now() - Duration::seconds(1));
        c.last_error = Some("HTTP 401: unauthorized".to_string());
        let report = CredentialReport {
            credential: c,
            available_tokens: 4.0,
            can_use: false,
            usage_ratio: 0.25,
        };

        let line = formatter.format_credential_line(&report, now());
        assert!(line.contains("disabled"));
        assert!(line.contains("HTTP 401: unauthorized"));
        assert!(!line.contains("until"));
    }

    #[test]
    fn test_empty_credential_table() {
        let formatter = TextFormatter::new(false);
        assert_eq!(formatter.format_credentials(&[], now()), "No credentials configured");
    }

    #[test]
    fn test_provider_health() {
        let formatter = TextFormatter::new(false);
        let health = vec![ProviderHealth {
            provider: Provider::SearchAd,
            available: false,
            keys: 2,
            active_keys: 0,
            cooling_keys: 1,
            disabled_keys: 1,
            daily_quota_used: 40,
            daily_quota_total: 16000,
        }];

        let output = formatter.format_provider_health(&health);
        assert!(output.starts_with("Providers"));
        assert!(output.contains("searchad"));
        assert!(output.contains("✗ unavailable"));
        assert!(output.contains("cooling 1, disabled 1"));
        assert!(output.contains("quota 40/16000"));
    }

    #[test]
    fn test_queue_and_processing_stats() {
        let formatter = TextFormatter::new(false);
        let queue = QueueStats {
            pending: 3,
            processing: 1,
            completed: 10,
            failed: 2,
            total: 16,
        };
        let output = formatter.format_queue_stats(&queue);
        assert!(output.contains("pending 3"));
        assert!(output.contains("failed 2"));
        assert!(output.contains("(total 16)"));

        let mut processing = ProcessingStats::default();
        processing.docs.processed = 4;
        processing.docs.avg_processing_ms = 812.4;
        let output = formatter.format_processing_stats(&processing);
        assert!(output.contains("fetch_related  processed 0"));
        assert!(output.contains("count_docs     processed 4  failed 0  avg 812 ms"));
    }

    #[test]
    fn test_collect_and_enqueue() {
        let formatter = TextFormatter::new(false);
        let report = CollectReport {
            kind: JobKind::FetchRelated,
            keywords: 7,
            job_ids: vec![1, 2],
        };
        assert_eq!(
            formatter.format_collect(&report),
            "Queued 7 keywords in 2 fetch_related jobs"
        );

        let empty = CollectReport {
            kind: JobKind::CountDocs,
            keywords: 0,
            job_ids: vec![],
        };
        assert_eq!(formatter.format_collect(&empty), "No keywords waiting for count_docs");

        assert_eq!(
            formatter.format_enqueued(JobKind::CountDocs, &[4, 5]),
            "Enqueued 2 count_docs jobs: 4, 5"
        );
    }

    #[test]
    fn test_keyword() {
        let formatter = TextFormatter::new(false);
        let keyword = Keyword {
            id: 12,
            term: "camping chair".to_string(),
            parent_id: None,
            depth: 0,
            source: KeywordSource::Seed,
            status: KeywordStatus::Queued,
            metrics: None,
            created_at: now(),
            updated_at: now(),
        };
        assert_eq!(
            formatter.format_keyword(&keyword),
            "Keyword #12 camping chair (queued, depth 0)"
        );
    }

    #[test]
    fn test_keyword_listing_table() {
        let formatter = TextFormatter::new(false);
        let row = ListedKeyword {
            keyword: Keyword {
                id: 31,
                term: "tent stake".to_string(),
                parent_id: Some(12),
                depth: 1,
                source: KeywordSource::Related,
                status: KeywordStatus::CountedDocs,
                metrics: None,
                created_at: now(),
                updated_at: now(),
            },
            search_volume: 2400,
            counts: DocCounts {
                blog: 120,
                cafe: 4,
                web: 880,
                news: 0,
            },
            counted_on: Some(now().date_naive()),
        };

        let output = formatter.format_keywords(&KeywordPage::new(vec![row], 3, 1));
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID"));
        let cells: Vec<&str> = lines[1].split_whitespace().collect();
        assert_eq!(
            cells,
            ["31", "tent", "stake", "2400", "120", "4", "880", "0", "counted_docs"]
        );
        assert_eq!(lines[2], "Showing 2-2 of 3 (next: --offset 2)");
    }

    #[test]
    fn test_empty_keyword_listing() {
        let formatter = TextFormatter::new(false);
        let page = KeywordPage::new(Vec::new(), 0, 0);
        assert_eq!(formatter.format_keywords(&page), "No keywords match (0 in total)");
    }
}

#[cfg(test)]
mod json_formatter_tests {
    use super::super::json::JsonFormatter;
    use kwharvest_core::{Credential, CredentialStatus, Provider};
    use kwharvest_fetch::CredentialReport;

    #[test]
    fn test_credential_report_hides_secret() {
        let now = chrono::Utc::now();
        let report = CredentialReport {
            credential: Credential {
                id: 1,
                provider: Provider::SearchAd,
                label: "main".to_string(),
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
                refilled_at: now,
                last_used_at: None,
            },
            available_tokens: 1.0,
            can_use: true,
            usage_ratio: 0.0,
        };

        let output = JsonFormatter::new(false).format(&[report]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert!(!output.contains("top-secret"));
        assert_eq!(value[0]["label"], "main");
        assert_eq!(value[0]["provider"], "searchad");
        assert_eq!(value[0]["status"], "active");
        assert_eq!(value[0]["can_use"], true);
    }
}
