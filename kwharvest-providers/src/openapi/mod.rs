//! Open-API provider: per-section document counts.
//!
//! One document count queries the blog, cafe, web and news search endpoints
//! with `display=1` and keeps only their `total`.

mod api;
pub(crate) mod parser;

pub use api::{OPENAPI_BASE, OpenApiClient, SearchSection};
pub use parser::parse_search_total;
