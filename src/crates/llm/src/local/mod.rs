//! Local provider clients

pub mod ollama;

pub use ollama::OllamaClient;
