//! Completion-call boundary
//!
//! Everything above this module treats the model as an opaque
//! request/response capability: chat messages in, text plus cost out. The
//! `ChatCompletion` trait is the seam tests script against; `OpenAiClient`
//! is the production implementation. The client makes exactly one attempt
//! per call — retry policy belongs to the orchestrator, which owns the
//! bounded retry budget and the fallback messages.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::LlmSettings;
use crate::error::CompletionError;

/// One role-tagged message in a conversation transcript.
///
/// `name` is set only on function-role messages and carries the capability
/// name that produced the content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            name: None,
        }
    }

    pub fn function(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "function".to_string(),
            content: content.into(),
            name: Some(name.into()),
        }
    }
}

/// Per-agent completion configuration: which model answers, how creative it
/// may be, and how long one turn may take.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl CompletionConfig {
    pub fn from_settings(llm: &LlmSettings) -> Self {
        Self {
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            timeout: Duration::from_secs(llm.request_timeout_secs),
        }
    }
}

/// The text of a completion plus what it cost, in account currency.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub cost: f64,
}

#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        config: &CompletionConfig,
    ) -> Result<Completion, CompletionError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// OpenAI-compatible chat-completions client.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    input_cost_per_1k: f64,
    output_cost_per_1k: f64,
}

impl OpenAiClient {
    pub fn new(api_key: String, llm: &LlmSettings) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: llm.base_url.trim_end_matches('/').to_string(),
            input_cost_per_1k: llm.input_cost_per_1k,
            output_cost_per_1k: llm.output_cost_per_1k,
        }
    }

    fn cost_of(&self, usage: &Usage) -> f64 {
        (usage.prompt_tokens as f64 / 1000.0) * self.input_cost_per_1k
            + (usage.completion_tokens as f64 / 1000.0) * self.output_cost_per_1k
    }
}

#[async_trait]
impl ChatCompletion for OpenAiClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        config: &CompletionConfig,
    ) -> Result<Completion, CompletionError> {
        let request = ChatRequest {
            model: &config.model,
            messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stream: false,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let send = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send();

        let response = tokio::time::timeout(config.timeout, send)
            .await
            .map_err(|_| CompletionError::Timeout(config.timeout))??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                "[OpenAiClient] provider returned {} for model {}",
                status,
                config.model
            );
            return Err(CompletionError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Malformed(e.to_string()))?;

        let text = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| CompletionError::Malformed("response carried no choices".to_string()))?;

        let cost = parsed
            .usage
            .as_ref()
            .map(|u| self.cost_of(u))
            .unwrap_or(0.0);

        tracing::debug!(
            "[OpenAiClient] {} answered {} chars, cost {:.6}",
            config.model,
            text.len(),
            cost
        );

        Ok(Completion { text, cost })
    }
}
