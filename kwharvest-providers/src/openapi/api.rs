//! Open-API search client.

use async_trait::async_trait;
use futures::future::try_join_all;
use kwharvest_core::{Credential, DocCountApi, DocCounts, UpstreamError};
use kwharvest_fetch::http::ensure_success;
use kwharvest_fetch::{HttpClient, HttpError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, instrument};

use super::parser::parse_search_total;

// ============================================================================
// Constants
// ============================================================================

/// Open-API base URL.
pub const OPENAPI_BASE: &str = "https://openapi.naver.com";

// ============================================================================
// Sections
// ============================================================================

/// Searchable document sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSection {
    /// Blog posts.
    Blog,
    /// Cafe articles.
    Cafe,
    /// Web documents.
    Web,
    /// News articles.
    News,
}

impl SearchSection {
    /// All sections, in [`DocCounts`] field order.
    pub fn all() -> [SearchSection; 4] {
        [Self::Blog, Self::Cafe, Self::Web, Self::News]
    }

    /// Endpoint path of the section.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Blog => "/v1/search/blog.json",
            Self::Cafe => "/v1/search/cafearticle.json",
            Self::Web => "/v1/search/webkr.json",
            Self::News => "/v1/search/news.json",
        }
    }
}

// ============================================================================
// API Client
// ============================================================================

/// Document-count client for the open-API search endpoints.
#[derive(Debug, Clone)]
pub struct OpenApiClient {
    http: HttpClient,
    base_url: String,
}

impl OpenApiClient {
    /// Creates a client against the production API.
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: OPENAPI_BASE.to_string(),
        }
    }

    /// Points the client at another host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_headers(credential: &Credential) -> Result<HeaderMap, UpstreamError> {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("x-naver-client-id", credential.key_id.as_str()),
            ("x-naver-client-secret", credential.key_secret.as_str()),
        ] {
            let value = HeaderValue::from_str(value)
                .map_err(|e| UpstreamError::from(HttpError::InvalidHeader(format!("{name}: {e}"))))?;
            headers.insert(HeaderName::from_static(name), value);
        }
        Ok(headers)
    }

    /// Total hits of `term` in one section.
    #[instrument(skip(self, credential), fields(credential_id = credential.id))]
    pub async fn search_total(
        &self,
        credential: &Credential,
        section: SearchSection,
        term: &str,
    ) -> Result<u64, UpstreamError> {
        let url = format!("{}{}", self.base_url, section.path());
        let query = [
            ("query", term.to_string()),
            ("display", "1".to_string()),
            ("start", "1".to_string()),
        ];

        let response = self
            .http
            .get_with_headers(&url, &query, Self::build_headers(credential)?)
            .await?;
        let response = ensure_success(response).await?;
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::from(HttpError::from(e)))?;
        parse_search_total(&body)
    }
}

#[async_trait]
impl DocCountApi for OpenApiClient {
    async fn doc_counts(
        &self,
        credential: &Credential,
        term: &str,
    ) -> Result<DocCounts, UpstreamError> {
        let totals = try_join_all(
            SearchSection::all()
                .into_iter()
                .map(|section| self.search_total(credential, section, term)),
        )
        .await?;

        let counts = match totals.as_slice() {
            [blog, cafe, web, news] => DocCounts {
                blog: *blog,
                cafe: *cafe,
                web: *web,
                news: *news,
            },
            _ => {
                return Err(UpstreamError::InvalidResponse(
                    "section count mismatch".to_string(),
                ));
            }
        };
        debug!(term, total = counts.total(), "Document counts fetched");
        Ok(counts)
    }
}
