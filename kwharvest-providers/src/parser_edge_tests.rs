//! Edge case tests for the response parsers.

use kwharvest_core::{Competition, UpstreamError};

use crate::openapi::parser::parse_search_total;
use crate::searchad::parser::parse_keyword_tool_response;

// ============================================================================
// Search-ad
// ============================================================================

#[test]
fn test_searchad_empty_body_is_invalid() {
    let err = parse_keyword_tool_response("").unwrap_err();
    assert!(matches!(err, UpstreamError::InvalidResponse(_)));
}

#[test]
fn test_searchad_blank_terms_are_skipped() {
    let body = r#"{"keywordList": [
        {"relKeyword": "   ", "monthlyPcQcCnt": 500},
        {"relKeyword": "tent", "monthlyPcQcCnt": 500}
    ]}"#;
    let rows = parse_keyword_tool_response(body).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].term, "tent");
}

#[test]
fn test_searchad_duplicate_terms_keep_first() {
    let body = r#"{"keywordList": [
        {"relKeyword": "Tent", "monthlyPcQcCnt": 500},
        {"relKeyword": "tent ", "monthlyPcQcCnt": 900}
    ]}"#;
    let rows = parse_keyword_tool_response(body).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].metrics.pc, 500);
}

#[test]
fn test_searchad_garbage_numbers_default() {
    let body = r#"{"keywordList": [{
        "relKeyword": "lantern",
        "monthlyPcQcCnt": "n/a",
        "monthlyMobileQcCnt": {"nested": 1},
        "monthlyAvePcCtr": "abc",
        "monthlyAveMobileCtr": "1.5",
        "plAvgDepth": -3
    }]}"#;
    let rows = parse_keyword_tool_response(body).unwrap();
    let metrics = rows[0].metrics;
    assert_eq!(metrics.pc, 10);
    assert_eq!(metrics.mobile, 10);
    assert!(metrics.ctr_pc.abs() < f64::EPSILON);
    assert!((metrics.ctr_mobile - 1.5).abs() < f64::EPSILON);
    assert_eq!(metrics.ad_count, 0);
    assert_eq!(metrics.competition, Competition::Low);
}

#[test]
fn test_searchad_competition_labels() {
    let body = r#"{"keywordList": [
        {"relKeyword": "a", "compIdx": "중간"},
        {"relKeyword": "b", "compIdx": "HIGH"},
        {"relKeyword": "c", "compIdx": "85"},
        {"relKeyword": "d", "compIdx": ""}
    ]}"#;
    let levels: Vec<_> = parse_keyword_tool_response(body)
        .unwrap()
        .into_iter()
        .map(|k| k.metrics.competition)
        .collect();
    assert_eq!(
        levels,
        vec![
            Competition::Medium,
            Competition::High,
            Competition::High,
            Competition::Low
        ]
    );
}

#[test]
fn test_searchad_fractional_ad_depth_rounds() {
    let body = r#"{"keywordList": [{"relKeyword": "stove", "plAvgDepth": 4.6}]}"#;
    let rows = parse_keyword_tool_response(body).unwrap();
    assert_eq!(rows[0].metrics.ad_count, 5);
}

// ============================================================================
// Open-API
// ============================================================================

#[test]
fn test_openapi_total_as_string_is_invalid() {
    assert!(parse_search_total(r#"{"total":"12"}"#).is_err());
}

#[test]
fn test_openapi_null_total_is_zero() {
    assert_eq!(parse_search_total(r#"{"total":null}"#).unwrap(), 0);
}

#[test]
fn test_openapi_error_body_without_total() {
    let body = r#"{"errorMessage":"Scope Status Invalid","errorCode":"024"}"#;
    assert_eq!(parse_search_total(body).unwrap(), 0);
}
