//! Local Ollama-style endpoint client
//!
//! No API key, no cloud: talks to a locally running server's `/api/chat`
//! with `stream: false`.

use crate::config::ProviderConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use cascade_core::error::Result as CoreResult;
use cascade_core::llm::{ChatMessage, ChatRole, LlmClient, LlmResponse, TokenUsage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Local endpoint client
#[derive(Clone)]
pub struct OllamaClient {
    config: ProviderConfig,
    client: Client,
}

impl OllamaClient {
    pub fn new(config: ProviderConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(LlmError::Http)?;
        Ok(Self { config, client })
    }

    /// Whether the local server is up.
    pub async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.config.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn invoke(
        &self,
        messages: Vec<ChatMessage>,
        schema: Option<Value>,
        max_tokens: Option<u32>,
    ) -> CoreResult<LlmResponse> {
        let url = format!("{}/api/chat", self.config.base_url);

        let wire_messages: Vec<WireMessage> = messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::Tool => "tool",
                }
                .to_string(),
                content: m.content.clone(),
            })
            .collect();

        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: wire_messages,
            stream: false,
            format: schema.map(|_| "json".to_string()),
            options: ChatOptions {
                temperature: self.config.temperature,
                num_predict: max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(LlmError::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider(format!(
                "Ollama API error {}: {}",
                status, text
            ))
            .into());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(LlmResponse {
            content: parsed.message.content,
            usage: TokenUsage::new(
                parsed.prompt_eval_count.unwrap_or(0),
                parsed.eval_count.unwrap_or(0),
            ),
        })
    }
}

// Ollama API wire types
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: WireMessage,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    #[test]
    fn test_client_creation() {
        let config = ProviderConfig::new(ProviderKind::Ollama, "llama3");
        assert!(OllamaClient::new(config).is_ok());
    }
}
