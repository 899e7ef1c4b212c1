use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::types::{AppError, AppResult, LLMMessage, LLMRequest, LLMResponse};

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse>;
}

/// Configuration for an LLM provider
#[derive(Debug, Clone)]
pub struct LLMProviderConfig {
    pub name: String,
    pub api_key: String,
    pub model: String,
    /// Overrides the provider's default endpoint
    pub base_url: Option<String>,
    pub timeout: Duration,
}

pub struct LLM {
    adapter: Box<dyn LLMAdapter>,
    provider_name: String,
    model: String,
}

impl LLM {
    pub fn new(provider: LLMProviderConfig) -> AppResult<Self> {
        if provider.api_key.is_empty() {
            return Err(AppError::LLMApi(format!(
                "No API key configured for provider {}",
                provider.name
            )));
        }

        let adapter: Box<dyn LLMAdapter> = match provider.name.as_str() {
            "anthropic" => {
                let base = provider
                    .base_url
                    .as_deref()
                    .unwrap_or(crate::llm::anthropic::ANTHROPIC_API_BASE);
                Box::new(crate::llm::anthropic::AnthropicAdapter::new_with_api_base(
                    &provider.api_key,
                    base,
                    provider.timeout,
                )?)
            }
            name => {
                let base = match provider.base_url.as_deref() {
                    Some(base) => base,
                    None => crate::llm::openai::default_api_base(name).ok_or_else(|| {
                        AppError::LLMApi(format!("Unsupported provider: {}", name))
                    })?,
                };
                Box::new(crate::llm::openai::OpenAIAdapter::new_with_api_base(
                    &provider.api_key,
                    base,
                    provider.timeout,
                )?)
            }
        };

        Ok(Self {
            adapter,
            provider_name: provider.name,
            model: provider.model,
        })
    }

    /// Wrap an existing adapter (alternative backends, tests)
    pub fn from_adapter(
        adapter: Box<dyn LLMAdapter>,
        provider_name: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            adapter,
            provider_name: provider_name.into(),
            model: model.into(),
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.adapter.create_chat_completion(request).await
    }

    /// Single-prompt completion returning the response text
    pub async fn complete(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
        system_prompt: Option<&str>,
    ) -> AppResult<String> {
        let request = LLMRequest {
            provider: self.provider_name.clone(),
            model: self.model.clone(),
            messages: vec![LLMMessage::user(prompt)],
            max_tokens: Some(max_tokens),
            temperature: Some(temperature),
            system_instruction: system_prompt.map(str::to_string),
        };

        let response = self.adapter.create_chat_completion(&request).await?;
        debug!(
            provider = %self.provider_name,
            finish_reason = %response.finish_reason,
            total_tokens = response.usage.total_tokens,
            "Completion received"
        );
        Ok(response.content)
    }
}
