//! Filtered, sorted listing of harvested keywords.
//!
//! A [`ListedKeyword`] is a keyword joined with its most recent document
//! counts. Stores evaluate a [`KeywordQuery`] natively; [`KeywordQuery::matches`]
//! and [`KeywordQuery::compare`] define the semantics they must agree with.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::models::keyword::{normalize_term, DocCountRecord, DocCounts, Keyword, KeywordStatus};

/// Keywords below this monthly search volume are hidden by default.
pub const LOW_VOLUME_THRESHOLD: u64 = 500;

/// Page size when none is given.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Largest page a query may ask for.
pub const MAX_PAGE_SIZE: usize = 1000;

// ============================================================================
// Sorting
// ============================================================================

/// A column keywords can be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortColumn {
    /// Combined desktop and mobile search volume.
    Volume,
    /// Latest blog document count.
    Blog,
    /// Latest cafe document count.
    Cafe,
    /// Latest web document count.
    Web,
    /// Latest news document count.
    News,
    /// The term itself.
    Term,
    /// Distance from the seed.
    Depth,
    /// Creation time.
    CreatedAt,
}

impl SortColumn {
    /// Returns the stable identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Volume => "sv_total",
            Self::Blog => "blog_total",
            Self::Cafe => "cafe_total",
            Self::Web => "web_total",
            Self::News => "news_total",
            Self::Term => "keyword",
            Self::Depth => "depth",
            Self::CreatedAt => "created_at",
        }
    }
}

impl fmt::Display for SortColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortColumn {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "sv_total" | "sv" | "volume" => Ok(Self::Volume),
            "blog_total" | "blog" => Ok(Self::Blog),
            "cafe_total" | "cafe" => Ok(Self::Cafe),
            "web_total" | "web" => Ok(Self::Web),
            "news_total" | "news" => Ok(Self::News),
            "keyword" | "term" => Ok(Self::Term),
            "depth" => Ok(Self::Depth),
            "created_at" | "created" => Ok(Self::CreatedAt),
            other => Err(CoreError::InvalidData(format!(
                "unknown sort column: {other}"
            ))),
        }
    }
}

/// One sort clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// Column to compare.
    pub column: SortColumn,
    /// Largest first.
    pub descending: bool,
}

impl SortKey {
    /// Smallest first.
    pub fn asc(column: SortColumn) -> Self {
        Self {
            column,
            descending: false,
        }
    }

    /// Largest first.
    pub fn desc(column: SortColumn) -> Self {
        Self {
            column,
            descending: true,
        }
    }

    /// Parses a comma-separated list like `cafe_total:asc,sv_total:desc`.
    ///
    /// A clause without a direction sorts ascending.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, CoreError> {
        let keys = raw
            .split(',')
            .filter(|clause| !clause.trim().is_empty())
            .map(str::parse::<Self>)
            .collect::<Result<Vec<Self>, _>>()?;
        if keys.is_empty() {
            return Err(CoreError::InvalidData("empty sort".to_string()));
        }
        Ok(keys)
    }

    /// The listing order when none is given: fewest cafe documents, then
    /// highest search volume.
    pub fn default_order() -> Vec<Self> {
        vec![Self::asc(SortColumn::Cafe), Self::desc(SortColumn::Volume)]
    }
}

impl FromStr for SortKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, direction) = s.trim().split_once(':').unwrap_or((s, "asc"));
        let column = column.parse()?;
        match direction.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::asc(column)),
            "desc" => Ok(Self::desc(column)),
            other => Err(CoreError::InvalidData(format!(
                "unknown sort direction: {other}"
            ))),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.descending { "desc" } else { "asc" };
        write!(f, "{}:{direction}", self.column)
    }
}

// ============================================================================
// Ranges
// ============================================================================

/// Inclusive bounds on a count. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRange {
    /// Smallest accepted value.
    pub min: Option<u64>,
    /// Largest accepted value.
    pub max: Option<u64>,
}

impl CountRange {
    /// Returns true if `value` is within both bounds.
    pub fn contains(&self, value: u64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

impl FromStr for CountRange {
    type Err = CoreError;

    /// Parses `min..max`, `min..` or `..max`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidData(format!("invalid range: {s} (use min..max)"));
        let (min, max) = s.trim().split_once("..").ok_or_else(invalid)?;
        let bound = |raw: &str| -> Result<Option<u64>, CoreError> {
            let raw = raw.trim();
            if raw.is_empty() {
                Ok(None)
            } else {
                raw.parse().map(Some).map_err(|_| invalid())
            }
        };

        let range = Self {
            min: bound(min)?,
            max: bound(max)?,
        };
        if let (Some(min), Some(max)) = (range.min, range.max) {
            if min > max {
                return Err(invalid());
            }
        }
        Ok(range)
    }
}

// ============================================================================
// Listed Keyword
// ============================================================================

/// A keyword with its latest document counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListedKeyword {
    /// The keyword.
    #[serde(flatten)]
    pub keyword: Keyword,
    /// Combined search volume, zero before metrics are fetched.
    pub search_volume: u64,
    /// Latest counts, zero before the keyword is counted.
    pub counts: DocCounts,
    /// Date of the latest counts.
    pub counted_on: Option<NaiveDate>,
}

impl ListedKeyword {
    /// Joins a keyword with its most recent count row.
    pub fn new(keyword: Keyword, latest: Option<&DocCountRecord>) -> Self {
        Self {
            search_volume: keyword.metrics.map_or(0, |m| m.total_volume()),
            counts: latest.map(|r| r.counts).unwrap_or_default(),
            counted_on: latest.map(|r| r.date),
            keyword,
        }
    }

    fn count(&self, column: SortColumn) -> Option<u64> {
        match column {
            SortColumn::Volume => Some(self.search_volume),
            SortColumn::Blog => Some(self.counts.blog),
            SortColumn::Cafe => Some(self.counts.cafe),
            SortColumn::Web => Some(self.counts.web),
            SortColumn::News => Some(self.counts.news),
            SortColumn::Term | SortColumn::Depth | SortColumn::CreatedAt => None,
        }
    }

    fn compare_by(&self, other: &Self, column: SortColumn) -> Ordering {
        match column {
            SortColumn::Term => self.keyword.term.cmp(&other.keyword.term),
            SortColumn::Depth => self.keyword.depth.cmp(&other.keyword.depth),
            SortColumn::CreatedAt => self.keyword.created_at.cmp(&other.keyword.created_at),
            counted => self.count(counted).cmp(&other.count(counted)),
        }
    }
}

// ============================================================================
// Query
// ============================================================================

/// Filters, order and page of a keyword listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordQuery {
    /// Substring the term must contain (normalized before matching).
    pub search: Option<String>,
    /// Only keywords in this pipeline state.
    pub status: Option<KeywordStatus>,
    /// Hide keywords below [`LOW_VOLUME_THRESHOLD`].
    pub hide_low_volume: bool,
    /// Hide keywords whose latest counts are all zero (or missing).
    pub hide_zero_docs: bool,
    /// Bounds on the search volume.
    pub volume: CountRange,
    /// Bounds on the blog count.
    pub blog: CountRange,
    /// Bounds on the cafe count.
    pub cafe: CountRange,
    /// Bounds on the web count.
    pub web: CountRange,
    /// Bounds on the news count.
    pub news: CountRange,
    /// Sort clauses, applied in order; ties end in id order.
    pub sort: Vec<SortKey>,
    /// Page size, clamped to `1..=MAX_PAGE_SIZE`.
    pub limit: usize,
    /// Rows to skip.
    pub offset: usize,
}

impl Default for KeywordQuery {
    fn default() -> Self {
        Self {
            search: None,
            status: None,
            hide_low_volume: true,
            hide_zero_docs: true,
            volume: CountRange::default(),
            blog: CountRange::default(),
            cafe: CountRange::default(),
            web: CountRange::default(),
            news: CountRange::default(),
            sort: SortKey::default_order(),
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl KeywordQuery {
    /// A query that hides nothing.
    pub fn everything() -> Self {
        Self {
            hide_low_volume: false,
            hide_zero_docs: false,
            ..Self::default()
        }
    }

    /// The effective page size.
    pub fn page_size(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }

    /// The normalized search text, if any is left after trimming.
    pub fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(normalize_term)
            .filter(|term| !term.is_empty())
    }

    /// Range filters paired with the column they bound.
    pub fn ranges(&self) -> [(SortColumn, CountRange); 5] {
        [
            (SortColumn::Volume, self.volume),
            (SortColumn::Blog, self.blog),
            (SortColumn::Cafe, self.cafe),
            (SortColumn::Web, self.web),
            (SortColumn::News, self.news),
        ]
    }

    /// Returns true if `row` passes every filter.
    pub fn matches(&self, row: &ListedKeyword) -> bool {
        if let Some(term) = self.search_term() {
            if !row.keyword.term.contains(&term) {
                return false;
            }
        }
        if self.status.is_some_and(|status| row.keyword.status != status) {
            return false;
        }
        if self.hide_low_volume && row.search_volume < LOW_VOLUME_THRESHOLD {
            return false;
        }
        if self.hide_zero_docs && row.counts.total() == 0 {
            return false;
        }
        self.ranges()
            .iter()
            .all(|(column, range)| row.count(*column).is_none_or(|v| range.contains(v)))
    }

    /// Orders two rows by the sort clauses, then by id.
    pub fn compare(&self, a: &ListedKeyword, b: &ListedKeyword) -> Ordering {
        self.sort
            .iter()
            .map(|key| {
                let ordering = a.compare_by(b, key.column);
                if key.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.keyword.id.cmp(&b.keyword.id))
    }
}

/// One page of a keyword listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordPage {
    /// Rows on this page.
    pub keywords: Vec<ListedKeyword>,
    /// Rows matching the filters across all pages.
    pub total: u64,
    /// Rows skipped before this page.
    pub offset: usize,
    /// More rows follow this page.
    pub has_more: bool,
}

impl KeywordPage {
    /// Cuts the page `query` asks for out of every matching row, already sorted.
    pub fn from_sorted(rows: Vec<ListedKeyword>, query: &KeywordQuery) -> Self {
        let total = rows.len();
        let keywords: Vec<ListedKeyword> = rows
            .into_iter()
            .skip(query.offset)
            .take(query.page_size())
            .collect();
        Self::new(keywords, total as u64, query.offset)
    }

    /// Builds a page from rows already cut to size.
    pub fn new(keywords: Vec<ListedKeyword>, total: u64, offset: usize) -> Self {
        let shown = (offset + keywords.len()) as u64;
        Self {
            has_more: shown < total,
            keywords,
            total,
            offset,
        }
    }
}
