//! HTTP agent invoker
//!
//! `POST {endpoint}/agents/{agent_id}/invoke` with `{"query": "..."}`. The
//! response body is returned as-is; a `{"result": ...}` envelope is unwrapped.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{AgentError, AgentInvoker};

pub struct HttpAgentInvoker {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct InvokeRequest<'a> {
    query: &'a str,
}

impl HttpAgentInvoker {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
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
impl AgentInvoker for HttpAgentInvoker {
    async fn invoke(&self, agent_id: &str, sub_query: &str) -> Result<Value, AgentError> {
        let url = format!("{}/agents/{}/invoke", self.endpoint, agent_id);
        let mut request = self.client.post(&url).json(&InvokeRequest { query: sub_query });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AgentError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AgentError::UnknownAgent(agent_id.to_string()));
        }
        if !status.is_success() {
            return Err(AgentError::Status {
                agent_id: agent_id.to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let mut body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::ParseError(e.to_string()))?;

        debug!(agent_id = %agent_id, "Agent responded");
        Ok(match body.get_mut("result") {
            Some(result) => result.take(),
            None => body,
        })
    }
}
