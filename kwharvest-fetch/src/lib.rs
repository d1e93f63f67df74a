// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # kwharvest Fetch
//!
//! Credential selection, admission control and retrying upstream calls.
//!
//! Every external call made by kwharvest passes through three layers:
//!
//! - [`credentials::CredentialManager`] - picks the least-used credential
//!   with tokens left, refills token buckets, and degrades credentials on
//!   429 (cooldown) and 401/403 (disable)
//! - [`admission::AdmissionController`] - enforces a global concurrency
//!   ceiling per operation class and keeps trailing request/error stats
//! - [`caller::UpstreamCaller`] - retries transient failures with jittered
//!   exponential backoff and writes each outcome back to the credential
//!
//! The HTTP plumbing shared by the upstream clients lives in [`http`] and
//! [`sign`].
//!
//! ## Example
//!
//! ```ignore
//! use kwharvest_fetch::{AdmissionController, CredentialManager, RetryStrategy, UpstreamCaller};
//!
//! let manager = Arc::new(CredentialManager::new(store, clock, CredentialSettings::default()));
//! let admission = Arc::new(AdmissionController::new(manager));
//! let caller = UpstreamCaller::new(admission, RetryStrategy::default());
//!
//! let keywords = caller
//!     .call(Provider::SearchAd, OperationClass::Related, |credential| {
//!         api.related_keywords(&credential, &hints)
//!     })
//!     .await?;
//! ```

pub mod admission;
pub mod caller;
pub mod credentials;
pub mod error;
pub mod http;
pub mod retry;
pub mod sign;
pub mod slots;
pub mod stats;

pub use admission::{Admission, AdmissionController, HealthReport};
pub use caller::UpstreamCaller;
pub use credentials::{CredentialManager, CredentialReport, CredentialSettings, ProviderHealth};
pub use error::{FetchError, HttpError};
pub use http::HttpClient;
pub use retry::RetryStrategy;
pub use sign::RequestSigner;
pub use slots::{GlobalSlots, SlotPermit, SlotUsage};
pub use stats::{RateLimitStats, StatsWindow};
