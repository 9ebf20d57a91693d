//! Anthropic messages API client
//!
//! System messages are carried separately from the conversation, as the
//! messages API requires; schema constraints are folded into the system
//! prompt since structured output is prompt-driven here.

use crate::config::ProviderConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use cascade_core::error::Result as CoreResult;
use cascade_core::llm::{ChatMessage, ChatRole, LlmClient, LlmResponse, TokenUsage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic API client
#[derive(Clone)]
pub struct AnthropicClient {
    config: ProviderConfig,
    client: Client,
}

impl AnthropicClient {
    pub fn new(config: ProviderConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(LlmError::Http)?;
        Ok(Self { config, client })
    }

    /// Split system messages out; Anthropic takes them as a separate field.
    fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<WireMessage>) {
        let mut system: Option<String> = None;
        let mut wire = Vec::new();

        for message in messages {
            match message.role {
                ChatRole::System => {
                    system = Some(match system {
                        Some(existing) => format!("{}\n\n{}", existing, message.content),
                        None => message.content.clone(),
                    });
                }
                ChatRole::User => wire.push(WireMessage {
                    role: "user".to_string(),
                    content: message.content.clone(),
                }),
                ChatRole::Assistant => wire.push(WireMessage {
                    role: "assistant".to_string(),
                    content: message.content.clone(),
                }),
                ChatRole::Tool => wire.push(WireMessage {
                    role: "user".to_string(),
                    content: format!("[Tool Result] {}", message.content),
                }),
            }
        }

        (system, wire)
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn invoke(
        &self,
        messages: Vec<ChatMessage>,
        schema: Option<Value>,
        max_tokens: Option<u32>,
    ) -> CoreResult<LlmResponse> {
        let url = format!("{}/v1/messages", self.config.base_url);
        let (mut system, wire_messages) = Self::convert_messages(&messages);

        if let Some(schema) = &schema {
            let instruction = format!(
                "Respond with a single JSON object conforming to this schema:\n{}",
                schema
            );
            system = Some(match system {
                Some(existing) if !existing.contains(&instruction) => {
                    format!("{}\n\n{}", existing, instruction)
                }
                Some(existing) => existing,
                None => instruction,
            });
        }

        let body = MessagesRequest {
            model: self.config.model.clone(),
            messages: wire_messages,
            system,
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: self.config.temperature,
        };

        let api_key = self.config.api_key.clone().unwrap_or_default();
        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(LlmError::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 => LlmError::Authentication(text),
                429 => LlmError::RateLimit(text),
                _ => LlmError::Provider(format!("Anthropic API error {}: {}", status, text)),
            }
            .into());
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .content
            .iter()
            .filter_map(|block| {
                if block.block_type == "text" {
                    block.text.clone()
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(LlmResponse {
            content,
            usage: TokenUsage::new(parsed.usage.input_tokens, parsed.usage.output_tokens),
        })
    }
}

// Anthropic API wire types
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u64,
    output_tokens: u64,
}
