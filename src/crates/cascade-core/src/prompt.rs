//! Prompt execution
//!
//! The [`PromptExecutor`] trait is the seam between the engine and the
//! prompt/LLM layer: a node hands over a prompt name and resolved variables
//! and gets back a structured value plus token usage. The bundled
//! [`TemplatePromptExecutor`] resolves prompt files (graph-relative first,
//! then the global default directory), renders `{var}` substitutions,
//! supports `{include:name}` composition with a loading stack that rejects
//! circular inclusion, caches file contents, and invokes the selected
//! [`LlmClient`](crate::llm::LlmClient).

use crate::error::{EngineError, Result};
use crate::llm::{select_provider, ChatMessage, LlmResolver, TokenUsage};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

fn include_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{include:([A-Za-z0-9_\-./]+)\}").unwrap())
}

/// A prompt invocation request
#[derive(Debug, Clone, Default)]
pub struct PromptRequest {
    pub prompt_name: String,
    pub variables: HashMap<String, Value>,
    /// JSON schema the response must conform to; implies a parsed result
    pub schema: Option<Value>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    /// Directory of the graph config, for graph-relative prompt resolution
    pub graph_dir: Option<PathBuf>,
}

/// Result of a prompt invocation
#[derive(Debug, Clone)]
pub struct PromptOutcome {
    /// Parsed object when a schema was supplied, raw string otherwise
    pub value: Value,
    pub usage: Option<TokenUsage>,
}

/// Seam between nodes and the prompt/LLM layer
#[async_trait]
pub trait PromptExecutor: Send + Sync {
    async fn execute(&self, request: PromptRequest) -> Result<PromptOutcome>;
}

/// File-template prompt executor backed by an [`LlmResolver`]
pub struct TemplatePromptExecutor {
    resolver: Arc<dyn LlmResolver>,
    default_dir: Option<PathBuf>,
    default_provider: Option<String>,
    default_model: Option<String>,
    cache: Mutex<HashMap<PathBuf, String>>,
}

impl TemplatePromptExecutor {
    pub fn new(resolver: Arc<dyn LlmResolver>) -> Self {
        Self {
            resolver,
            default_dir: None,
            default_provider: None,
            default_model: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Global prompt directory tried after the graph-relative one.
    pub fn with_default_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_dir = Some(dir.into());
        self
    }

    /// Graph-default provider/model tier of the selection policy.
    pub fn with_defaults(mut self, provider: Option<String>, model: Option<String>) -> Self {
        self.default_provider = provider;
        self.default_model = model;
        self
    }

    fn resolve_file(&self, name: &str, graph_dir: Option<&Path>) -> Result<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(dir) = graph_dir {
            candidates.push(dir.join("prompts").join(format!("{}.md", name)));
            candidates.push(dir.join(format!("{}.md", name)));
        }
        if let Some(dir) = &self.default_dir {
            candidates.push(dir.join(format!("{}.md", name)));
        }

        candidates
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| EngineError::MissingFile(format!("prompt '{}'", name)))
    }

    fn read_cached(&self, path: &Path) -> Result<String> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(content) = cache.get(path) {
                return Ok(content.clone());
            }
        }

        let content = std::fs::read_to_string(path)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(path.to_path_buf(), content.clone());
        }
        Ok(content)
    }

    // Recursively expand {include:name}, tracking the per-invocation loading
    // stack to reject cycles.
    fn load_template(
        &self,
        name: &str,
        graph_dir: Option<&Path>,
        stack: &mut Vec<String>,
    ) -> Result<String> {
        if stack.iter().any(|s| s == name) {
            return Err(EngineError::InvalidConfig(format!(
                "circular prompt inclusion: {} -> {}",
                stack.join(" -> "),
                name
            )));
        }
        stack.push(name.to_string());

        let path = self.resolve_file(name, graph_dir)?;
        let raw = self.read_cached(&path)?;

        let mut expanded = String::with_capacity(raw.len());
        let mut last = 0;
        for caps in include_re().captures_iter(&raw) {
            let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
            let include_name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            expanded.push_str(&raw[last..whole.0]);
            expanded.push_str(&self.load_template(include_name, graph_dir, stack)?);
            last = whole.1;
        }
        expanded.push_str(&raw[last..]);

        stack.pop();
        Ok(expanded)
    }

    fn render(template: &str, variables: &HashMap<String, Value>) -> String {
        let mut rendered = template.to_string();
        for (key, value) in variables {
            let needle = format!("{{{}}}", key);
            let replacement = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&needle, &replacement);
        }
        rendered
    }
}

#[async_trait]
impl PromptExecutor for TemplatePromptExecutor {
    async fn execute(&self, request: PromptRequest) -> Result<PromptOutcome> {
        let mut stack = Vec::new();
        let template =
            self.load_template(&request.prompt_name, request.graph_dir.as_deref(), &mut stack)?;
        let rendered = Self::render(&template, &request.variables);

        let mut messages = vec![ChatMessage::user(rendered)];
        if let Some(schema) = &request.schema {
            messages.insert(
                0,
                ChatMessage::system(format!(
                    "Respond with a single JSON object conforming to this schema:\n{}",
                    schema
                )),
            );
        }

        let provider = select_provider(
            request.provider.as_deref(),
            None,
            self.default_provider.as_deref(),
        );
        let model = request.model.clone().or_else(|| self.default_model.clone());
        let client = self
            .resolver
            .resolve(provider.as_deref(), model.as_deref())
            .await?;

        debug!(prompt = %request.prompt_name, provider = ?provider, "executing prompt");
        let response = client
            .invoke(messages, request.schema.clone(), request.max_tokens)
            .await?;

        let value = if request.schema.is_some() {
            extract_json(&response.content).ok_or_else(|| {
                EngineError::node(
                    request.prompt_name.clone(),
                    "response did not contain a JSON object",
                )
            })?
        } else {
            Value::String(response.content)
        };

        Ok(PromptOutcome {
            value,
            usage: Some(response.usage),
        })
    }
}

/// Extract a JSON value from model output.
///
/// Handles raw JSON, fenced ```json blocks, and JSON embedded in prose
/// (first `{`/`[` to the matching end).
pub fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    // Fenced block
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        if let Some(end) = after[body_start..].find("```") {
            let body = &after[body_start..body_start + end];
            if let Ok(value) = serde_json::from_str(body.trim()) {
                return Some(value);
            }
        }
    }

    // Embedded object or array
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                    return Some(value);
                }
            }
        }
    }

    None
}
