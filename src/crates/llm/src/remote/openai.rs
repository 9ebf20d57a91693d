//! OpenAI-compatible chat completions client
//!
//! Works against api.openai.com and any endpoint speaking the same protocol
//! (Azure gateways, vLLM, llama.cpp server, OpenRouter).

use crate::config::ProviderConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use cascade_core::error::Result as CoreResult;
use cascade_core::llm::{ChatMessage, ChatRole, LlmClient, LlmResponse, TokenUsage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// OpenAI-compatible API client
#[derive(Clone)]
pub struct OpenAiClient {
    config: ProviderConfig,
    client: Client,
}

impl OpenAiClient {
    pub fn new(config: ProviderConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(LlmError::Http)?;
        Ok(Self { config, client })
    }

    fn convert_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
        messages
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
            .collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn invoke(
        &self,
        messages: Vec<ChatMessage>,
        schema: Option<Value>,
        max_tokens: Option<u32>,
    ) -> CoreResult<LlmResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: Self::convert_messages(&messages),
            max_tokens,
            temperature: self.config.temperature,
            response_format: schema.map(|_| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(LlmError::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 => LlmError::Authentication(text),
                429 => LlmError::RateLimit(text),
                _ => LlmError::Provider(format!("OpenAI API error {}: {}", status, text)),
            }
            .into());
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(LlmResponse { content, usage })
    }
}

// Wire types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    #[test]
    fn test_message_conversion() {
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi"),
        ];
        let wire = OpenAiClient::convert_messages(&messages);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[1].role, "user");
        assert_eq!(wire[2].role, "assistant");
        assert_eq!(wire[1].content, "hello");
    }

    #[test]
    fn test_client_creation() {
        let config =
            ProviderConfig::new(ProviderKind::OpenAi, "gpt-4o-mini").with_api_key("sk-test");
        assert!(OpenAiClient::new(config).is_ok());
    }
}
