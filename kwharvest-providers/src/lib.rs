// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # kwharvest Providers
//!
//! Concrete clients for the two upstream services.
//!
//! | Provider | Operation | Trait | Client |
//! |----------|-----------|-------|--------|
//! | searchad | related keywords (up to 5 hints per call) | `RelatedKeywordsApi` | [`SearchAdClient`] |
//! | openapi | blog/cafe/web/news document counts | `DocCountApi` | [`OpenApiClient`] |
//!
//! Each provider module holds an `api` part (request building, headers,
//! signing) and a `parser` part that normalizes response bodies. Clients
//! return [`kwharvest_core::UpstreamError`] so the caller can map HTTP
//! statuses onto credential state.
//!
//! ## Usage
//!
//! ```ignore
//! use kwharvest_fetch::HttpClient;
//! use kwharvest_providers::{OpenApiClient, SearchAdClient};
//!
//! let http = HttpClient::new()?;
//! let related = SearchAdClient::new(http.clone());
//! let docs = OpenApiClient::new(http);
//! ```

pub mod openapi;
pub mod searchad;

pub use openapi::{OPENAPI_BASE, OpenApiClient, SearchSection};
pub use searchad::{MAX_HINTS, SEARCHAD_API_BASE, SearchAdClient};

#[cfg(test)]
mod parser_edge_tests;
