//! Text output formatting with quota bars and colors.

use chrono::{DateTime, Utc};
use kwharvest_core::{
    Credential, CredentialStatus, JobKind, Keyword, KeywordPage, KeywordStatus, QueueStats,
};
use kwharvest_fetch::{CredentialReport, ProviderHealth};
use kwharvest_queue::{CollectReport, KindStats, ProcessingStats};

// ============================================================================
// ANSI Colors
// ============================================================================

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";

const BAR_FULL: char = '█';
const BAR_EMPTY: char = '░';

/// Text formatter with optional colors.
pub struct TextFormatter {
    use_colors: bool,
    bar_width: usize,
}

impl TextFormatter {
    /// Creates a new text formatter.
    pub fn new(use_colors: bool) -> Self {
        Self {
            use_colors,
            bar_width: 10,
        }
    }

    /// Formats a bar of the quota left, colored by how much remains.
    pub fn quota_bar(&self, percent_remaining: f64) -> String {
        let percent = percent_remaining.clamp(0.0, 100.0);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let filled = ((percent / 100.0) * self.bar_width as f64).round() as usize;
        let empty = self.bar_width.saturating_sub(filled);

        let bar = format!(
            "{}{}",
            BAR_FULL.to_string().repeat(filled),
            BAR_EMPTY.to_string().repeat(empty)
        );

        if percent < 20.0 {
            self.paint(RED, &bar)
        } else if percent < 50.0 {
            self.paint(YELLOW, &bar)
        } else {
            self.paint(GREEN, &bar)
        }
    }

    /// Formats a registered keyword.
    pub fn format_keyword(&self, keyword: &Keyword) -> String {
        format!(
            "Keyword #{} {} ({}, depth {})",
            keyword.id,
            self.paint(BOLD, &keyword.term),
            keyword.status,
            keyword.depth
        )
    }

    /// Formats the outcome of a collection trigger.
    pub fn format_collect(&self, report: &CollectReport) -> String {
        if report.job_ids.is_empty() {
            return self.paint(DIM, &format!("No keywords waiting for {}", report.kind));
        }
        format!(
            "Queued {} keywords in {} {} jobs",
            report.keywords,
            report.job_ids.len(),
            report.kind
        )
    }

    /// Formats the ids of freshly enqueued jobs.
    pub fn format_enqueued(&self, kind: JobKind, job_ids: &[i64]) -> String {
        let ids: Vec<String> = job_ids.iter().map(ToString::to_string).collect();
        format!("Enqueued {} {kind} jobs: {}", job_ids.len(), ids.join(", "))
    }

    /// Formats job counts by status.
    pub fn format_queue_stats(&self, stats: &QueueStats) -> String {
        let failed = if stats.failed > 0 {
            self.paint(RED, &stats.failed.to_string())
        } else {
            stats.failed.to_string()
        };
        format!(
            "{}\n  pending {}  processing {}  completed {}  failed {}  (total {})",
            self.paint(BOLD, "Queue"),
            stats.pending,
            stats.processing,
            stats.completed,
            failed,
            stats.total
        )
    }

    /// Formats in-process job statistics.
    pub fn format_processing_stats(&self, stats: &ProcessingStats) -> String {
        let line = |kind: JobKind, s: &KindStats| {
            format!(
                "  {:<14} processed {}  failed {}  avg {:.0} ms",
                kind.as_str(),
                s.processed,
                s.failed,
                s.avg_processing_ms
            )
        };
        [
            self.paint(BOLD, "Processing"),
            line(JobKind::FetchRelated, &stats.related),
            line(JobKind::CountDocs, &stats.docs),
        ]
        .join("\n")
    }

    /// Formats per-provider health.
    pub fn format_provider_health(&self, health: &[ProviderHealth]) -> String {
        let mut lines = vec![self.paint(BOLD, "Providers")];
        for h in health {
            let state = if h.available {
                self.paint(GREEN, "✓ available")
            } else {
                self.paint(RED, "✗ unavailable")
            };
            lines.push(format!(
                "  {:<10} {}  keys {} (active {}, cooling {}, disabled {})  quota {}/{}",
                h.provider.as_str(),
                state,
                h.keys,
                h.active_keys,
                h.cooling_keys,
                h.disabled_keys,
                h.daily_quota_used,
                h.daily_quota_total
            ));
        }
        lines.join("\n")
    }

    /// Formats the credential table.
    pub fn format_credentials(&self, reports: &[CredentialReport], now: DateTime<Utc>) -> String {
        if reports.is_empty() {
            return self.paint(DIM, "No credentials configured");
        }

        let mut lines = vec![self.paint(
            BOLD,
            &format!(
                "{:<4} {:<9} {:<16} {:<9} {:<12} {:>7}  {}",
                "ID", "Provider", "Label", "Status", "Quota left", "Tokens", "Note"
            ),
        )];
        for report in reports {
            lines.push(self.format_credential_line(report, now));
        }
        lines.join("\n")
    }

    /// Formats one credential row.
    pub fn format_credential_line(&self, report: &CredentialReport, now: DateTime<Utc>) -> String {
        let c = &report.credential;
        let status = format!("{:<9}", c.status.to_string());
        let status = match c.status {
            CredentialStatus::Active => self.paint(GREEN, &status),
            CredentialStatus::Cooling => self.paint(YELLOW, &status),
            CredentialStatus::Disabled => self.paint(RED, &status),
        };

        let remaining = (1.0 - report.usage_ratio) * 100.0;
        let note = match (c.cooldown_until, &c.last_error) {
            (Some(until), _) if until > now => {
                format!("until {}", until.format("%H:%M:%S"))
            }
            (_, Some(error)) => self.paint(DIM, error),
            _ => String::new(),
        };

        format!(
            "{:<4} {:<9} {:<16} {} {} {:>7.1}  {}",
            c.id,
            c.provider.as_str(),
            c.label,
            status,
            self.quota_bar(remaining),
            report.available_tokens,
            note
        )
    }

    /// Formats one page of the keyword listing.
    pub fn format_keywords(&self, page: &KeywordPage) -> String {
        if page.keywords.is_empty() {
            return self.paint(DIM, &format!("No keywords match ({} in total)", page.total));
        }

        let mut lines = vec![self.paint(
            BOLD,
            &format!(
                "{:<6} {:<24} {:>8} {:>8} {:>8} {:>9} {:>8}  {}",
                "ID", "Keyword", "Volume", "Blog", "Cafe", "Web", "News", "Status"
            ),
        )];
        for row in &page.keywords {
            let status = row.keyword.status;
            let label = match status {
                KeywordStatus::CountedDocs => self.paint(GREEN, status.as_str()),
                KeywordStatus::Error => self.paint(RED, status.as_str()),
                KeywordStatus::Queued | KeywordStatus::FetchedRel => {
                    self.paint(DIM, status.as_str())
                }
            };
            lines.push(format!(
                "{:<6} {:<24} {:>8} {:>8} {:>8} {:>9} {:>8}  {}",
                row.keyword.id,
                row.keyword.term,
                row.search_volume,
                row.counts.blog,
                row.counts.cafe,
                row.counts.web,
                row.counts.news,
                label
            ));
        }

        let first = page.offset + 1;
        let last = page.offset + page.keywords.len();
        let mut footer = format!("Showing {first}-{last} of {}", page.total);
        if page.has_more {
            footer.push_str(&format!(" (next: --offset {last})"));
        }
        lines.push(self.paint(DIM, &footer));
        lines.join("\n")
    }

    /// Formats the result of a credential sync.
    pub fn format_synced(&self, credentials: &[Credential]) -> String {
        let mut lines = vec![format!("Synced {} credentials", credentials.len())];
        for c in credentials {
            lines.push(format!(
                "  #{:<4} {:<9} {:<16} {} qps, {}/day",
                c.id,
                c.provider.as_str(),
                c.label,
                c.qps_limit,
                c.daily_quota
            ));
        }
        lines.join("\n")
    }

    /// Formats a manually re-enabled credential.
    pub fn format_reactivated(&self, credential: &Credential) -> String {
        format!(
            "Credential #{} ({}/{}) is {}",
            credential.id,
            credential.provider,
            credential.label,
            self.paint(GREEN, credential.status.as_str())
        )
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.use_colors {
            format!("{code}{text}{RESET}")
        } else {
            text.to_string()
        }
    }
}
