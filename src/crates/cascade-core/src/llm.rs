//! LLM client interface
//!
//! The engine is an orchestration framework, not an LLM client library: the
//! core defines the narrow [`LlmClient`] trait and the [`LlmResolver`] seam
//! through which providers are selected, and the `llm` crate (or the host
//! application) supplies implementations.
//!
//! Provider selection order, applied by callers of [`LlmResolver`]:
//! explicit argument > node metadata > graph defaults > the
//! `CASCADE_DEFAULT_PROVIDER` environment variable.

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Environment variable naming the process-level default provider
pub const DEFAULT_PROVIDER_ENV: &str = "CASCADE_DEFAULT_PROVIDER";

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
        }
    }
}

/// Token usage reported by a provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A complete model response
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// One streamed chunk of a response
#[derive(Debug, Clone)]
pub struct LlmChunk {
    pub content: String,
}

/// Stream of response chunks
pub type ChunkStream = BoxStream<'static, Result<LlmChunk>>;

/// Minimal provider-agnostic chat interface
///
/// Implementations must be `Send + Sync`; the engine shares them across
/// concurrently dispatched nodes.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a complete response.
    ///
    /// `schema` asks the model for a JSON object of that shape; providers
    /// without native structured output fold it into the prompt.
    async fn invoke(
        &self,
        messages: Vec<ChatMessage>,
        schema: Option<Value>,
        max_tokens: Option<u32>,
    ) -> Result<LlmResponse>;

    /// Stream a response chunk by chunk.
    ///
    /// The default implementation buffers `invoke` into a single chunk.
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: Option<u32>,
    ) -> Result<ChunkStream> {
        let response = self.invoke(messages, None, max_tokens).await?;
        Ok(futures::stream::iter(vec![Ok(LlmChunk {
            content: response.content,
        })])
        .boxed())
    }
}

/// Resolves `(provider, model)` pairs to cached client instances
///
/// The `llm` crate's client cache implements this; tests supply mocks.
#[async_trait]
pub trait LlmResolver: Send + Sync {
    async fn resolve(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<Arc<dyn LlmClient>>;
}

/// Apply the provider selection policy.
pub fn select_provider(
    explicit: Option<&str>,
    node: Option<&str>,
    graph_default: Option<&str>,
) -> Option<String> {
    explicit
        .or(node)
        .or(graph_default)
        .map(str::to_string)
        .or_else(|| std::env::var(DEFAULT_PROVIDER_ENV).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_total() {
        assert_eq!(TokenUsage::new(10, 5).total(), 15);
    }

    #[test]
    fn test_select_provider_precedence() {
        assert_eq!(
            select_provider(Some("explicit"), Some("node"), Some("graph")),
            Some("explicit".to_string())
        );
        assert_eq!(
            select_provider(None, Some("node"), Some("graph")),
            Some("node".to_string())
        );
        assert_eq!(
            select_provider(None, None, Some("graph")),
            Some("graph".to_string())
        );
    }

    #[tokio::test]
    async fn test_default_stream_buffers_invoke() {
        struct Fixed;

        #[async_trait]
        impl LlmClient for Fixed {
            async fn invoke(
                &self,
                _messages: Vec<ChatMessage>,
                _schema: Option<Value>,
                _max_tokens: Option<u32>,
            ) -> Result<LlmResponse> {
                Ok(LlmResponse {
                    content: "hello".to_string(),
                    usage: TokenUsage::new(1, 1),
                })
            }
        }

        let mut stream = Fixed.stream(vec![ChatMessage::user("hi")], None).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.content, "hello");
        assert!(stream.next().await.is_none());
    }
}
