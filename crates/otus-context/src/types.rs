//! Message-log entry shape and the budgets the context builder respects.

use otus_llm::ToolCall;
use serde::{Deserialize, Serialize};

/// One entry in a session's durable message log (§3 "Message log entry").
///
/// Distinct from [`otus_llm::Message`]: the log is what the daemon persists
/// and replays, the builder in this crate projects a bounded, budget-fitting
/// slice of it into the wire-facing [`otus_llm::Message`] sequence sent to
/// the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogEntry {
    /// User input.
    User {
        /// Message text.
        text: String,
    },
    /// A model turn. `tool_calls` is empty for a plain narration turn.
    Assistant {
        /// Free text, if the model said anything.
        text: Option<String>,
        /// Ordered tool calls requested, if any.
        tool_calls: Vec<ToolCall>,
    },
    /// The result of executing one tool call.
    ToolResult {
        /// Id of the [`ToolCall`] this responds to.
        tool_call_id: String,
        /// Result content.
        content: String,
        /// Whether the call failed.
        is_error: bool,
    },
    /// An injected system note (not the leading system prompt itself, which
    /// the builder supplies separately; this is for synthetic entries such
    /// as an interrupted-turn repair record).
    System {
        /// Message text.
        text: String,
    },
}

impl LogEntry {
    /// Character count this entry contributes toward a budget.
    #[must_use]
    pub fn char_len(&self) -> usize {
        match self {
            LogEntry::User { text } | LogEntry::System { text } => text.chars().count(),
            LogEntry::Assistant { text, tool_calls } => {
                let text_len = text.as_deref().map_or(0, |t| t.chars().count());
                let calls_len: usize = tool_calls
                    .iter()
                    .map(|tc| {
                        tc.name.chars().count()
                            + serde_json::to_string(&tc.arguments)
                                .map(|s| s.chars().count())
                                .unwrap_or_default()
                    })
                    .sum();
                text_len + calls_len
            }
            LogEntry::ToolResult { content, .. } => content.chars().count(),
        }
    }
}

/// Limits the context builder (§4.8) enforces when assembling the sequence
/// sent to the model.
#[derive(Debug, Clone, Copy)]
pub struct ContextBudgets {
    /// Maximum characters kept from a rolling summary.
    pub max_summary_chars: usize,
    /// Maximum number of recent log entries (after atomic-group selection).
    pub max_recent_messages: usize,
    /// Maximum characters spent on recent log entries.
    pub max_recent_chars: usize,
    /// Maximum characters kept from a single tool result before it is
    /// truncated with an ellipsis marker.
    pub max_tool_result_chars: usize,
    /// Overall character ceiling across summary, current-step note, and
    /// recent entries.
    pub max_total_chars: usize,
}

impl Default for ContextBudgets {
    fn default() -> Self {
        Self {
            max_summary_chars: 4_000,
            max_recent_messages: 40,
            max_recent_chars: 24_000,
            max_tool_result_chars: 4_000,
            max_total_chars: 32_000,
        }
    }
}
