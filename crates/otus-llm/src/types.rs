//! Wire-facing message and tool types for the remote model client.
//!
//! Unlike a provider abstraction meant to span several vendor wire formats,
//! [`MessageContent::Assistant`] carries both optional free text *and*
//! tool calls simultaneously (§3's `assistant(text?, tool_calls?)`), since
//! the inference engine's context builder needs to round-trip that shape
//! before it gets flattened to the OpenAI wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role, matching the four roles the chat-completions wire format
/// recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Model output.
    Assistant,
    /// Tool execution result.
    Tool,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call id, used to correlate the eventual tool result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Parsed tool arguments.
    pub arguments: Value,
}

/// Result of executing one tool call, ready to feed back to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Id of the call this responds to.
    pub call_id: String,
    /// Result content (stdout, error text, JSON-encoded data, ...).
    pub content: String,
    /// Whether the call failed.
    #[serde(default)]
    pub is_error: bool,
}

/// Body of a [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageContent {
    /// Plain text (user/system messages, or an assistant turn with no tool
    /// calls — never sent back to the model per the persistence rule, but a
    /// valid shape nonetheless).
    Text(String),
    /// An assistant turn: optional narration plus the ordered tool calls it
    /// requested. Free text here is dropped when re-serialising to the
    /// wire format, matching what OpenAI-compatible endpoints expect from
    /// a tool-calling assistant turn.
    Assistant {
        /// Narration accompanying the tool calls, if any.
        text: Option<String>,
        /// Ordered tool calls.
        tool_calls: Vec<ToolCall>,
    },
    /// A tool result.
    ToolResult(ToolCallResult),
}

/// One entry in the sequence sent to (or returned from) the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message role.
    pub role: MessageRole,
    /// Message body.
    pub content: MessageContent,
}

impl Message {
    /// Build a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Build a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Build an assistant turn carrying tool calls (and optional
    /// accompanying narration).
    #[must_use]
    pub fn assistant_with_tools(text: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Assistant { text, tool_calls },
        }
    }

    /// Build a tool result message.
    #[must_use]
    pub fn tool_result(result: ToolCallResult) -> Self {
        Self {
            role: MessageRole::Tool,
            content: MessageContent::ToolResult(result),
        }
    }

    /// Free text carried by this message, if any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) => Some(text),
            MessageContent::Assistant { text, .. } => text.as_deref(),
            MessageContent::ToolResult(_) => None,
        }
    }

    /// Tool calls carried by this message, if any.
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        match &self.content {
            MessageContent::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// A tool definition advertised to the model (§4.9 "A tool is `{name,
/// human description, JSON-Schema parameters}`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name, exactly as the model must call it.
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON-Schema describing the tool's input.
    pub input_schema: Value,
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Natural end of turn.
    EndTurn,
    /// Hit the configured `max_tokens`.
    MaxTokens,
    /// The model chose to call one or more tools.
    ToolUse,
    /// A configured stop sequence (or content filter) was hit.
    StopSequence,
}

/// Token usage reported by the endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    /// Prompt tokens.
    pub input_tokens: usize,
    /// Completion tokens.
    pub output_tokens: usize,
}

/// A completed (non-streaming) chat-completion response, parsed into
/// otus's own shape (§4.10.c "Parse: extract free text and the ordered
/// list of function tool calls").
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Free text the model returned, if any.
    pub text: Option<String>,
    /// Ordered tool calls the model requested.
    pub tool_calls: Vec<ToolCall>,
    /// Why the model stopped.
    pub stop_reason: StopReason,
    /// Token usage for this call.
    pub usage: Usage,
}

impl CompletionResponse {
    /// Whether the model requested any tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_message_carries_text_and_tool_calls_simultaneously() {
        let msg = Message::assistant_with_tools(
            Some("checking the workspace".to_owned()),
            vec![ToolCall {
                id: "t1".to_owned(),
                name: "start_sandbox".to_owned(),
                arguments: serde_json::json!({}),
            }],
        );
        assert_eq!(msg.text(), Some("checking the workspace"));
        assert_eq!(msg.tool_calls().len(), 1);
    }

    #[test]
    fn text_only_message_has_no_tool_calls() {
        let msg = Message::user("hello");
        assert!(msg.tool_calls().is_empty());
        assert_eq!(msg.text(), Some("hello"));
    }
}
