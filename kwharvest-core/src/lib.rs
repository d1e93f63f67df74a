// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # kwharvest Core
//!
//! Core types, models, and traits shared by every kwharvest crate.
//!
//! - Domain models (credentials, jobs, keywords, document counts)
//! - Error types ([`CoreError`], [`UpstreamError`])
//! - The [`Clock`] time source
//! - Collaborator traits for the record store and the two upstream APIs
//!
//! ## Key Types
//!
//! ### Credentials
//! - [`Provider`] - The two upstream services
//! - [`OperationClass`] - Work categories with independent concurrency ceilings
//! - [`Credential`] - Key bundle with token-bucket and quota state
//!
//! ### Jobs
//! - [`Job`] - Durable, retryable unit of batched work
//! - [`JobKind`] - The closed set of job types
//! - [`QueueStats`] - Job counts by status
//!
//! ### Keywords
//! - [`Keyword`] - Seeded or discovered term
//! - [`RelatedKeyword`] - Normalized related-keyword row
//! - [`DocCounts`] - Per-section document totals
//! - [`KeywordQuery`] / [`KeywordPage`] - Filtered keyword listing

pub mod clock;
pub mod error;
pub mod models;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, UpstreamError};

pub use models::{
    // Credentials
    Credential,
    CredentialFilter,
    CredentialGuard,
    CredentialPatch,
    CredentialStatus,
    NewCredential,
    OperationClass,
    Provider,
    // Jobs
    Job,
    JobKind,
    JobPatch,
    JobPayload,
    JobStatus,
    NewJob,
    QueueStats,
    // Keywords
    normalize_term,
    Competition,
    DocCountRecord,
    DocCounts,
    Keyword,
    KeywordMetrics,
    KeywordSource,
    KeywordStatus,
    NewKeyword,
    RelatedKeyword,
    MIN_SEARCH_VOLUME,
    // Listing
    CountRange,
    KeywordPage,
    KeywordQuery,
    ListedKeyword,
    SortColumn,
    SortKey,
    DEFAULT_PAGE_SIZE,
    LOW_VOLUME_THRESHOLD,
    MAX_PAGE_SIZE,
};

pub use traits::{
    CredentialStore, DocCountApi, JobStore, KeywordStore, RecordStore, RelatedKeywordsApi,
};
