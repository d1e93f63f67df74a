//! Search-ad provider: related keywords with search volume metrics.
//!
//! Requests are signed with HMAC-SHA256 over `timestamp.method.uri` and
//! carry the license key and customer id of the credential.

mod api;
pub(crate) mod parser;

pub use api::{MAX_HINTS, SEARCHAD_API_BASE, SearchAdClient};
pub use parser::parse_keyword_tool_response;
