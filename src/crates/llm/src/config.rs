//! Provider configuration

use crate::error::{LlmError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Known provider families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions API
    OpenAi,
    /// Anthropic messages API
    Anthropic,
    /// Local Ollama-style endpoint
    Ollama,
}

impl ProviderKind {
    /// Parse a provider name as written in configs and env vars.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "ollama" | "local" => Ok(ProviderKind::Ollama),
            other => Err(LlmError::UnknownProvider(other.to_string())),
        }
    }

    /// Environment variable the API key is read from; local providers have
    /// none.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::Ollama => None,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Ollama => "http://localhost:11434",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-3-5-sonnet-latest",
            ProviderKind::Ollama => "llama3",
        }
    }
}

/// Configuration for a single provider client
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            kind,
            api_key: None,
            base_url: kind.default_base_url().to_string(),
            model: model.into(),
            temperature: None,
            timeout: default_timeout(),
        }
    }

    /// Build a config from the environment: API key from the provider's
    /// variable, base URL override from `CASCADE_<PROVIDER>_BASE_URL`.
    pub fn from_env(kind: ProviderKind, model: Option<&str>) -> Result<Self> {
        let api_key = match kind.api_key_env() {
            Some(var) => Some(
                std::env::var(var).map_err(|_| LlmError::ApiKeyNotFound(var.to_string()))?,
            ),
            None => None,
        };

        let base_var = match kind {
            ProviderKind::OpenAi => "CASCADE_OPENAI_BASE_URL",
            ProviderKind::Anthropic => "CASCADE_ANTHROPIC_BASE_URL",
            ProviderKind::Ollama => "CASCADE_OLLAMA_BASE_URL",
        };
        let base_url =
            std::env::var(base_var).unwrap_or_else(|_| kind.default_base_url().to_string());

        Ok(Self {
            kind,
            api_key,
            base_url,
            model: model.unwrap_or(kind.default_model()).to_string(),
            temperature: None,
            timeout: default_timeout(),
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provider_names() {
        assert_eq!(ProviderKind::parse("openai").unwrap(), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::parse("Claude").unwrap(), ProviderKind::Anthropic);
        assert_eq!(ProviderKind::parse("local").unwrap(), ProviderKind::Ollama);
        assert!(ProviderKind::parse("mystery").is_err());
    }

    #[test]
    fn test_builder() {
        let config = ProviderConfig::new(ProviderKind::OpenAi, "gpt-4o")
            .with_api_key("sk-test")
            .with_base_url("http://proxy.internal/v1")
            .with_temperature(0.2)
            .with_timeout(Duration::from_secs(10));

        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.base_url, "http://proxy.internal/v1");
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_ollama_needs_no_key() {
        assert!(ProviderKind::Ollama.api_key_env().is_none());
    }
}
