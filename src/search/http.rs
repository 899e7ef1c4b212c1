//! HTTP search backend
//!
//! Speaks a minimal JSON protocol so any vector, graph or relational store can
//! sit behind a small adapter service:
//!
//! `POST {endpoint}` with `{"query": "...", "top_k": 10}` returns
//! `{"results": [{"id": "...", "score": 0.9, "payload": {...}}]}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BackendKind, SearchBackend, SearchError, SearchHit};

pub struct HttpSearchBackend {
    client: Client,
    kind: BackendKind,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

impl HttpSearchBackend {
    pub fn new(kind: BackendKind, endpoint: &str, timeout: Duration) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            kind,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = if key.is_empty() { None } else { Some(key) };
        self
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, SearchError> {
        let mut request = self.client.post(&self.endpoint).json(&SearchRequest { query, top_k });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SearchError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::RequestFailed(format!("{} backend returned {}: {}", self.kind, status, body)));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::ParseError(e.to_string()))?;

        debug!(backend = %self.kind, hits = parsed.results.len(), "HTTP search complete");
        Ok(parsed.results)
    }
}
