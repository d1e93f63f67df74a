//! Domain models for kwharvest.
//!
//! ## Submodules
//!
//! - [`credential`] - Providers, operation classes, credentials and their partial updates
//! - [`job`] - Job kinds, states, payloads and queue counts
//! - [`keyword`] - Keywords, search metrics and document counts
//! - [`listing`] - Filtered, sorted keyword listings joined with their latest counts

mod credential;
mod job;
mod keyword;
mod listing;

pub use credential::{
    Credential, CredentialFilter, CredentialGuard, CredentialPatch, CredentialStatus,
    NewCredential, OperationClass, Provider,
};
pub use job::{Job, JobKind, JobPatch, JobPayload, JobStatus, NewJob, QueueStats};
pub use keyword::{
    normalize_term, Competition, DocCountRecord, DocCounts, Keyword, KeywordMetrics,
    KeywordSource, KeywordStatus, NewKeyword, RelatedKeyword, MIN_SEARCH_VOLUME,
};
pub use listing::{
    CountRange, KeywordPage, KeywordQuery, ListedKeyword, SortColumn, SortKey, DEFAULT_PAGE_SIZE,
    LOW_VOLUME_THRESHOLD, MAX_PAGE_SIZE,
};
#[cfg(test)]
mod serde_tests;
