//! Keyword and harvest result types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Search volumes below this floor are reported as the floor.
pub const MIN_SEARCH_VOLUME: u64 = 10;

// ============================================================================
// Keyword Status
// ============================================================================

/// Where a keyword is in the harvest pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeywordStatus {
    /// Waiting for a related-keyword fetch.
    #[default]
    Queued,
    /// Related keywords fetched; waiting for document counts.
    FetchedRel,
    /// Document counts stored.
    CountedDocs,
    /// A job for this keyword failed terminally.
    Error,
}

impl KeywordStatus {
    /// Returns the stable identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::FetchedRel => "fetched_rel",
            Self::CountedDocs => "counted_docs",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for KeywordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeywordStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "fetched_rel" => Ok(Self::FetchedRel),
            "counted_docs" => Ok(Self::CountedDocs),
            "error" => Ok(Self::Error),
            other => Err(CoreError::InvalidData(format!(
                "unknown keyword status: {other}"
            ))),
        }
    }
}

/// How a keyword entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeywordSource {
    /// Registered by an operator.
    #[default]
    Seed,
    /// Discovered through a related-keyword fetch.
    Related,
}

impl KeywordSource {
    /// Returns the stable identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Related => "related",
        }
    }
}

impl FromStr for KeywordSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seed" => Ok(Self::Seed),
            "related" => Ok(Self::Related),
            other => Err(CoreError::InvalidData(format!(
                "unknown keyword source: {other}"
            ))),
        }
    }
}

// ============================================================================
// Competition
// ============================================================================

/// Advertiser competition level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Competition {
    /// Low competition.
    #[default]
    Low,
    /// Medium competition.
    Medium,
    /// High competition.
    High,
}

impl Competition {
    /// Returns the stable identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Normalizes an upstream competition label.
    ///
    /// Accepts English and Korean labels as well as a 0-100 numeric index
    /// (`<= 30` low, `<= 70` medium, above that high). Anything else is low.
    pub fn normalize(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.to_ascii_lowercase().as_str() {
            "low" | "낮음" => return Self::Low,
            "medium" | "mid" | "중간" => return Self::Medium,
            "high" | "높음" => return Self::High,
            _ => {}
        }
        match raw.parse::<f64>() {
            Ok(n) if n <= 30.0 => Self::Low,
            Ok(n) if n <= 70.0 => Self::Medium,
            Ok(_) => Self::High,
            Err(_) => Self::Low,
        }
    }
}

impl FromStr for Competition {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::normalize(s))
    }
}

// ============================================================================
// Keyword
// ============================================================================

/// A harvested or seeded search term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    /// Store-assigned identifier.
    pub id: i64,
    /// Normalized term.
    pub term: String,
    /// Keyword this one was discovered from.
    pub parent_id: Option<i64>,
    /// Distance from the seed.
    pub depth: u32,
    /// Origin.
    pub source: KeywordSource,
    /// Pipeline state.
    pub status: KeywordStatus,
    /// Latest search metrics, if fetched.
    pub metrics: Option<KeywordMetrics>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Normalizes a search term: trims and lowercases, collapsing inner whitespace.
pub fn normalize_term(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Monthly search metrics for a term.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct KeywordMetrics {
    /// Monthly desktop searches (floored at 10).
    pub pc: u64,
    /// Monthly mobile searches (floored at 10).
    pub mobile: u64,
    /// Desktop click-through rate, percent.
    pub ctr_pc: f64,
    /// Mobile click-through rate, percent.
    pub ctr_mobile: f64,
    /// Average ad depth.
    pub ad_count: u32,
    /// Competition level.
    pub competition: Competition,
}

impl KeywordMetrics {
    /// Combined desktop and mobile volume.
    pub fn total_volume(&self) -> u64 {
        self.pc + self.mobile
    }
}

/// One normalized row from a related-keyword lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedKeyword {
    /// Normalized term.
    pub term: String,
    /// Search metrics.
    pub metrics: KeywordMetrics,
}

/// A keyword discovered from a parent, ready to upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewKeyword {
    /// Normalized term.
    pub term: String,
    /// Parent keyword.
    pub parent_id: Option<i64>,
    /// Distance from the seed.
    pub depth: u32,
    /// Origin.
    pub source: KeywordSource,
    /// Initial status.
    pub status: KeywordStatus,
    /// Metrics, if known.
    pub metrics: Option<KeywordMetrics>,
}

impl NewKeyword {
    /// A seed keyword at depth zero, queued for collection.
    pub fn seed(term: &str) -> Self {
        Self {
            term: normalize_term(term),
            parent_id: None,
            depth: 0,
            source: KeywordSource::Seed,
            status: KeywordStatus::Queued,
            metrics: None,
        }
    }
}

// ============================================================================
// Document Counts
// ============================================================================

/// Per-section document totals for a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DocCounts {
    /// Blog posts.
    pub blog: u64,
    /// Cafe (community) articles.
    pub cafe: u64,
    /// Web documents.
    pub web: u64,
    /// News articles.
    pub news: u64,
}

impl DocCounts {
    /// Sum over all sections.
    pub fn total(&self) -> u64 {
        self.blog + self.cafe + self.web + self.news
    }
}

/// Stored document counts for one keyword on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocCountRecord {
    /// Keyword.
    pub keyword_id: i64,
    /// Collection date (UTC).
    pub date: NaiveDate,
    /// Totals.
    pub counts: DocCounts,
}
