//! Remote model provider trait.
//!
//! The inference engine calls the model once per iteration and parses a
//! complete response (§4.10.b); there is no token-level streaming surface
//! in this daemon's design (§9: `TurnEvent`s are built at iteration/tool-call
//! granularity, not from model-token deltas), so this trait exposes only a
//! non-streaming `complete`.

use async_trait::async_trait;

use crate::error::LlmResult;
use crate::types::{CompletionResponse, Message, ToolDefinition};

/// A remote chat-completions endpoint.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier sent on every request.
    fn model(&self) -> &str;

    /// Send one chat-completions request and parse the result.
    ///
    /// # Errors
    /// Returns [`crate::error::LlmError`] on transport failure, a non-2xx
    /// status, or a response that doesn't match the expected shape.
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> LlmResult<CompletionResponse>;
}

/// Per-request configuration for an [`LlmProvider`].
#[derive(Clone)]
pub struct ProviderConfig {
    /// Base URL, e.g. `https://api.openai.com/v1/chat/completions`.
    pub base_url: String,
    /// Bearer API key. `None` is only valid against a local endpoint.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Maximum tokens to request per completion.
    pub max_tokens: usize,
    /// Per-request timeout.
    pub timeout: std::time::Duration,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}
