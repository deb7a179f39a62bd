//! Remote chat-completions client (§6 "Remote model API"). The model
//! endpoint itself is an external collaborator; this crate implements the
//! OpenAI-compatible wire shape the daemon assumes.

mod error;
mod openai_compat;
mod provider;
mod types;

pub use error::{LlmError, LlmResult};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{LlmProvider, ProviderConfig};
pub use types::{
    CompletionResponse, Message, MessageContent, MessageRole, StopReason, ToolCall,
    ToolCallResult, ToolDefinition, Usage,
};
