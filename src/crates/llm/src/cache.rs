//! Per-engine client cache and provider resolution
//!
//! Clients are cached by `(provider, model, temperature)` and created
//! lazily on first use. The cache implements
//! [`LlmResolver`](cascade_core::llm::LlmResolver), the seam the prompt
//! executor resolves providers through; each engine owns its own cache and
//! drops it on shutdown — nothing is process-global.

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::LlmError;
use crate::local::OllamaClient;
use crate::remote::{AnthropicClient, OpenAiClient};
use async_trait::async_trait;
use cascade_core::error::Result as CoreResult;
use cascade_core::llm::{select_provider, LlmClient, LlmResolver};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

// Temperature participates in the key; f32 isn't Eq, so store its bits.
type CacheKey = (ProviderKind, String, Option<u32>);

/// Lazily constructed, per-engine cache of provider clients
pub struct ClientCache {
    clients: Mutex<HashMap<CacheKey, Arc<dyn LlmClient>>>,
    default_provider: Option<String>,
    temperature: Option<f32>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            default_provider: None,
            temperature: None,
        }
    }

    /// Provider used when neither the call nor the environment names one.
    pub fn with_default_provider(mut self, provider: impl Into<String>) -> Self {
        self.default_provider = Some(provider.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    async fn get_or_build(
        &self,
        kind: ProviderKind,
        model: Option<&str>,
    ) -> Result<Arc<dyn LlmClient>, LlmError> {
        let model_name = model.unwrap_or(kind.default_model()).to_string();
        let key = (kind, model_name.clone(), self.temperature.map(f32::to_bits));

        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        debug!(provider = ?kind, model = %model_name, "building provider client");
        let mut config = ProviderConfig::from_env(kind, Some(&model_name))?;
        if let Some(temperature) = self.temperature {
            config = config.with_temperature(temperature);
        }

        let client: Arc<dyn LlmClient> = match kind {
            ProviderKind::OpenAi => Arc::new(OpenAiClient::new(config)?),
            ProviderKind::Anthropic => Arc::new(AnthropicClient::new(config)?),
            ProviderKind::Ollama => Arc::new(OllamaClient::new(config)?),
        };

        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Number of constructed clients (observability, tests).
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }
}

impl Default for ClientCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmResolver for ClientCache {
    async fn resolve(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> CoreResult<Arc<dyn LlmClient>> {
        let name = select_provider(provider, None, self.default_provider.as_deref())
            .unwrap_or_else(|| "openai".to_string());
        let kind = ProviderKind::parse(&name)?;
        Ok(self.get_or_build(kind, model).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_reuses_clients() {
        std::env::set_var("OPENAI_API_KEY", "sk-test");
        let cache = ClientCache::new();

        let a = cache
            .get_or_build(ProviderKind::OpenAi, Some("gpt-4o-mini"))
            .await
            .unwrap();
        let b = cache
            .get_or_build(ProviderKind::OpenAi, Some("gpt-4o-mini"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len().await, 1);

        // A different model is a different cache entry.
        cache
            .get_or_build(ProviderKind::OpenAi, Some("gpt-4o"))
            .await
            .unwrap();
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_local_provider_needs_no_key() {
        let cache = ClientCache::new();
        assert!(cache
            .get_or_build(ProviderKind::Ollama, None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unknown_provider_name() {
        let cache = ClientCache::new().with_default_provider("mystery");
        assert!(cache.resolve(None, None).await.is_err());
    }
}
