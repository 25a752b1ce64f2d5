use crate::error::{FlowError, FlowResult};
use crate::types::*;
use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// The text-generation capability every stage is built on: given a
/// conversation, return the model's reply.
pub trait ChatBackend: Send + Sync {
    fn model_name(&self) -> &str;

    /// `temperature` overrides the backend default for this call.
    fn chat(
        &self,
        messages: Vec<Message>,
        temperature: Option<f32>,
    ) -> impl Future<Output = Result<ChatResponse>> + Send;
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Upper bound for one request, connect to last byte.
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4".to_string(),
            temperature: Some(0.3),
            max_tokens: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// OpenAI-compatible `/chat/completions` client.
///
/// Each client owns its configuration; there is no process-wide key.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> FlowResult<Self> {
        if config.api_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
            return Err(FlowError::Configuration(
                "API key not configured. Set OPENAI_API_KEY or llm.api_key in the config file."
                    .to_string(),
            ));
        }
        if config.base_url.trim().is_empty() {
            return Err(FlowError::Configuration(
                "LLM base URL is empty.".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FlowError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }
}

impl ChatBackend for LlmClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn chat(&self, messages: Vec<Message>, temperature: Option<f32>) -> Result<ChatResponse> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            temperature: temperature.or(self.config.temperature),
            max_tokens: self.config.max_tokens,
        };

        debug!("LLM request to {}: {} messages", url, request.messages.len());

        let mut req_builder = self.http.post(&url).json(&request);

        if let Some(api_key) = &self.config.api_key {
            req_builder = req_builder.bearer_auth(api_key.trim());
        }

        let response = req_builder
            .send()
            .await
            .context("Failed to send request to LLM")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM request failed ({}): {}", status, error_text);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        info!(
            model = %self.config.model,
            finish_reason = ?chat_response
                .choices
                .first()
                .and_then(|c| c.finish_reason.as_deref()),
            total_tokens = ?chat_response.usage.as_ref().map(|u| u.total_tokens),
            "LLM response received"
        );

        Ok(chat_response)
    }
}
