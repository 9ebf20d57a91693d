//! Error types for LLM provider operations

use cascade_core::error::EngineError;
use thiserror::Error;

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors surfaced by provider clients
#[derive(Error, Debug)]
pub enum LlmError {
    /// API key environment variable is not set
    #[error("API key not found: {0}")]
    ApiKeyNotFound(String),

    /// Provider name did not resolve to a known client
    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// 401 from the provider
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// 429 from the provider
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Response body did not match the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Any other provider-reported error
    #[error("Provider error: {0}")]
    Provider(String),
}

// Provider failures surface to the engine as recoverable node errors, so
// per-node retry/fallback policies can act on them.
impl From<LlmError> for EngineError {
    fn from(err: LlmError) -> Self {
        EngineError::node("llm", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_is_recoverable() {
        let err: EngineError = LlmError::RateLimit("slow down".to_string()).into();
        assert!(err.is_recoverable());
        assert!(format!("{}", err).contains("slow down"));
    }
}
