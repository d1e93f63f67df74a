//! Search-ad keyword tool client.

use async_trait::async_trait;
use chrono::Utc;
use kwharvest_core::{Credential, RelatedKeyword, RelatedKeywordsApi, UpstreamError};
use kwharvest_fetch::http::ensure_success;
use kwharvest_fetch::{HttpClient, HttpError, RequestSigner};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, instrument};

use super::parser::parse_keyword_tool_response;

// ============================================================================
// Constants
// ============================================================================

/// Search-ad API base URL.
pub const SEARCHAD_API_BASE: &str = "https://api.naver.com";

/// Keyword tool endpoint. Also the URI covered by the signature.
const KEYWORD_TOOL_PATH: &str = "/keywordstool";

/// Most hint terms one call accepts.
pub const MAX_HINTS: usize = 5;

// ============================================================================
// API Client
// ============================================================================

/// Related-keyword client for the search-ad API.
#[derive(Debug, Clone)]
pub struct SearchAdClient {
    http: HttpClient,
    base_url: String,
}

impl SearchAdClient {
    /// Creates a client against the production API.
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: SEARCHAD_API_BASE.to_string(),
        }
    }

    /// Points the client at another host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Builds the signed request headers.
    fn build_headers(
        credential: &Credential,
        timestamp: &str,
    ) -> Result<HeaderMap, UpstreamError> {
        let customer_id = credential.customer_id.as_deref().ok_or_else(|| {
            UpstreamError::InvalidRequest(format!(
                "credential '{}' has no customer id",
                credential.label
            ))
        })?;
        let signature =
            RequestSigner::new(&credential.key_secret).sign(timestamp, "GET", KEYWORD_TOOL_PATH);

        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("x-timestamp", timestamp),
            ("x-api-key", credential.key_id.as_str()),
            ("x-customer", customer_id),
            ("x-signature", signature.as_str()),
        ] {
            let value = HeaderValue::from_str(value)
                .map_err(|e| UpstreamError::from(HttpError::InvalidHeader(format!("{name}: {e}"))))?;
            headers.insert(HeaderName::from_static(name), value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl RelatedKeywordsApi for SearchAdClient {
    #[instrument(skip(self, credential), fields(credential_id = credential.id))]
    async fn related_keywords(
        &self,
        credential: &Credential,
        hints: &[String],
    ) -> Result<Vec<RelatedKeyword>, UpstreamError> {
        if hints.is_empty() || hints.len() > MAX_HINTS {
            return Err(UpstreamError::InvalidRequest(format!(
                "between 1 and {MAX_HINTS} hint keywords required, got {}",
                hints.len()
            )));
        }

        let timestamp = Utc::now().timestamp_millis().to_string();
        let headers = Self::build_headers(credential, &timestamp)?;
        let url = format!("{}{KEYWORD_TOOL_PATH}", self.base_url);
        let query = [
            ("hintKeywords", hints.join(",")),
            ("showDetail", "1".to_string()),
        ];

        let response = self.http.get_with_headers(&url, &query, headers).await?;
        let response = ensure_success(response).await?;
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::from(HttpError::from(e)))?;

        let keywords = parse_keyword_tool_response(&body)?;
        debug!(found = keywords.len(), "Related keywords fetched");
        Ok(keywords)
    }
}
