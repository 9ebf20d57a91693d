//! # llm - Provider clients for cascade
//!
//! Implementations of the [`LlmClient`](cascade_core::llm::LlmClient) trait
//! for the providers the engine talks to:
//!
//! - [`OpenAiClient`] — OpenAI-compatible chat completions endpoints
//! - [`AnthropicClient`] — the Anthropic messages API
//! - [`OllamaClient`] — local Ollama-style servers
//!
//! plus the [`ClientCache`], a per-engine
//! [`LlmResolver`](cascade_core::llm::LlmResolver) that constructs clients
//! lazily and caches them by `(provider, model, temperature)`.
//!
//! Provider selection per call: explicit argument > node metadata > graph
//! defaults > the `CASCADE_DEFAULT_PROVIDER` environment variable. API keys
//! come from `OPENAI_API_KEY` / `ANTHROPIC_API_KEY`; local endpoints need
//! none.
//!
//! ```rust,no_run
//! use cascade_core::prompt::TemplatePromptExecutor;
//! use llm::ClientCache;
//! use std::sync::Arc;
//!
//! let cache = Arc::new(ClientCache::new().with_default_provider("anthropic"));
//! let prompts = TemplatePromptExecutor::new(cache);
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod local;
pub mod remote;

pub use cache::ClientCache;
pub use config::{ProviderConfig, ProviderKind};
pub use error::{LlmError, Result};
pub use local::OllamaClient;
pub use remote::{AnthropicClient, OpenAiClient};
