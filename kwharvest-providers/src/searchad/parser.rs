//! Search-ad keyword tool response parser.
//!
//! Counts arrive either as numbers or as strings such as `"< 10"`; CTRs may
//! be null. Everything is normalized into [`RelatedKeyword`] rows.

use kwharvest_core::{
    Competition, KeywordMetrics, MIN_SEARCH_VOLUME, RelatedKeyword, UpstreamError, normalize_term,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeywordToolResponse {
    #[serde(default)]
    keyword_list: Option<Vec<KeywordToolItem>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeywordToolItem {
    #[serde(default)]
    rel_keyword: String,
    #[serde(default)]
    monthly_pc_qc_cnt: Value,
    #[serde(default)]
    monthly_mobile_qc_cnt: Value,
    #[serde(default)]
    monthly_ave_pc_ctr: Value,
    #[serde(default)]
    monthly_ave_mobile_ctr: Value,
    #[serde(default)]
    pl_avg_depth: Value,
    #[serde(default)]
    comp_idx: Option<String>,
}

impl KeywordToolItem {
    fn into_related(self) -> Option<RelatedKeyword> {
        let term = normalize_term(&self.rel_keyword);
        if term.is_empty() {
            return None;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ad_count = number(&self.pl_avg_depth).max(0.0).round().min(f64::from(u32::MAX)) as u32;

        Some(RelatedKeyword {
            term,
            metrics: KeywordMetrics {
                pc: volume(&self.monthly_pc_qc_cnt),
                mobile: volume(&self.monthly_mobile_qc_cnt),
                ctr_pc: number(&self.monthly_ave_pc_ctr),
                ctr_mobile: number(&self.monthly_ave_mobile_ctr),
                ad_count,
                competition: self
                    .comp_idx
                    .as_deref()
                    .map_or(Competition::Low, Competition::normalize),
            },
        })
    }
}

/// Reads a number that may be encoded as a JSON number or string. Anything else is 0.
fn number(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite()).unwrap_or(0.0)
}

/// Monthly volume floored at [`MIN_SEARCH_VOLUME`]. `"< 10"` reads as the floor.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn volume(value: &Value) -> u64 {
    let raw = number(value);
    if raw <= 0.0 {
        return MIN_SEARCH_VOLUME;
    }
    (raw.floor() as u64).max(MIN_SEARCH_VOLUME)
}

/// Parses a keyword tool response body into normalized rows.
///
/// A body without `keywordList` yields no rows. Duplicate terms keep their
/// first occurrence.
pub fn parse_keyword_tool_response(body: &str) -> Result<Vec<RelatedKeyword>, UpstreamError> {
    debug!(len = body.len(), "Parsing keyword tool response");

    let response: KeywordToolResponse = serde_json::from_str(body)
        .map_err(|e| UpstreamError::InvalidResponse(format!("Invalid JSON: {e}")))?;

    let Some(items) = response.keyword_list else {
        warn!("Keyword tool response has no keywordList");
        return Ok(Vec::new());
    };

    let mut seen = std::collections::HashSet::new();
    Ok(items
        .into_iter()
        .filter_map(KeywordToolItem::into_related)
        .filter(|k| seen.insert(k.term.clone()))
        .collect())
}
