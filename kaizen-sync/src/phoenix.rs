//! Phoenix REST client
//!
//! Pages spans out of a Phoenix project:
//! `GET {base}/v1/projects/{project}/spans?limit=&cursor=`.

use async_trait::async_trait;
use kaizen_core::{KaizenError, KaizenResult, PhoenixSettings};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Page size cap imposed by the spans endpoint.
const PAGE_SIZE: usize = 100;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Trace/span identifiers of one captured LLM request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
}

/// One span as returned by the trace store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status_code: Option<String>,
    pub context: SpanContext,
    #[serde(default)]
    pub start_time: Option<String>,
    /// Flat attribute map (`gen_ai.prompt.{i}.role`, token usage, ...).
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SpanPage {
    #[serde(default)]
    data: Vec<Span>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// Anything that can hand the sync worker a window of spans.
#[async_trait]
pub trait SpanSource: Send + Sync {
    async fn fetch_spans(&self, limit: usize) -> KaizenResult<Vec<Span>>;
}

/// HTTP client for the Phoenix spans endpoint.
pub struct PhoenixClient {
    http: reqwest::Client,
    base_url: String,
    project: String,
}

impl PhoenixClient {
    pub fn new(settings: &PhoenixSettings) -> KaizenResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| KaizenError::store(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: settings.url.trim_end_matches('/').to_string(),
            project: settings.project.clone(),
        })
    }
}

#[async_trait]
impl SpanSource for PhoenixClient {
    /// Fetch spans, following pagination until `limit` spans or the cursor
    /// runs out.
    async fn fetch_spans(&self, limit: usize) -> KaizenResult<Vec<Span>> {
        let mut spans: Vec<Span> = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page_limit = PAGE_SIZE.min(limit.saturating_sub(spans.len()));
            let mut url = format!(
                "{}/v1/projects/{}/spans?limit={}",
                self.base_url, self.project, page_limit
            );
            if let Some(cursor) = &cursor {
                url.push_str(&format!("&cursor={cursor}"));
            }

            let response = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| KaizenError::store(format!("Failed to fetch spans: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(KaizenError::store(format!(
                    "Span fetch failed with status {status}"
                )));
            }

            let page: SpanPage = response
                .json()
                .await
                .map_err(|e| KaizenError::store(format!("Failed to parse span page: {e}")))?;

            spans.extend(page.data);
            cursor = page.next_cursor;

            if cursor.is_none() || spans.len() >= limit {
                break;
            }
        }

        Ok(spans)
    }
}

impl std::fmt::Debug for PhoenixClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhoenixClient")
            .field("base_url", &self.base_url)
            .field("project", &self.project)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn span_parses_with_defaults() {
        let span: Span = serde_json::from_value(json!({
            "context": {"trace_id": "t1", "span_id": "s1"},
        }))
        .unwrap();
        assert!(span.name.is_empty());
        assert!(span.status_code.is_none());
        assert!(span.attributes.is_empty());
    }

    #[test]
    fn span_page_tolerates_missing_fields() {
        let page: SpanPage = serde_json::from_value(json!({})).unwrap();
        assert!(page.data.is_empty());
        assert!(page.next_cursor.is_none());
    }
}
