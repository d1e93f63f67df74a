//! Open-API search response parser.

use kwharvest_core::UpstreamError;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total: Option<u64>,
}

/// Reads the `total` hit count of a search response. A missing total is 0.
pub fn parse_search_total(body: &str) -> Result<u64, UpstreamError> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| UpstreamError::InvalidResponse(format!("Invalid JSON: {e}")))?;

    Ok(response.total.unwrap_or_else(|| {
        warn!("Search response has no total");
        0
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_total() {
        let body = r#"{"lastBuildDate":"Mon, 02 Mar 2026 10:00:00 +0900","total":48213,"start":1,"display":1,"items":[{}]}"#;
        assert_eq!(parse_search_total(body).unwrap(), 48213);
    }

    #[test]
    fn test_missing_total_is_zero() {
        assert_eq!(parse_search_total(r#"{"items":[]}"#).unwrap(), 0);
    }

    #[test]
    fn test_negative_total_is_rejected() {
        assert!(parse_search_total(r#"{"total":-1}"#).is_err());
    }
}
