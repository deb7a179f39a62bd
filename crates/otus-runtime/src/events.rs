//! `TurnEvent`: the tagged union streamed from one `chat` call to the
//! session's client (§3 "TurnEvent (streamed)").

use serde::Serialize;

/// One event yielded by the inference loop while it drives a turn.
///
/// Lifetime: one event stream per `chat` call, terminating on
/// [`TurnEvent::Complete`], [`TurnEvent::Error`], or exhaustion after the
/// final [`TurnEvent::MaxIterationsReached`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A new loop iteration started.
    Iteration {
        /// Iteration number, 1-indexed.
        current: u32,
        /// Configured ceiling for this turn.
        max: u32,
    },
    /// Free-text narration the model produced alongside (or instead of)
    /// tool calls.
    Thinking {
        /// The narration text.
        text: String,
    },
    /// A tool call the model requested, about to be dispatched.
    ToolCall {
        /// Tool name.
        name: String,
        /// Parsed input arguments.
        input: serde_json::Value,
    },
    /// The result of executing a tool call.
    ToolResult {
        /// Tool name the result belongs to.
        name: String,
        /// Result content (or error message).
        result: String,
        /// Whether the call failed.
        #[serde(rename = "isError")]
        is_error: bool,
    },
    /// The model replaced the session plan.
    PlanCreated {
        /// The new ordered step list.
        steps: Vec<String>,
        /// Always 0 immediately after a plan is (re)created.
        #[serde(rename = "currentStep")]
        current_step: usize,
    },
    /// A plan step was marked done and the cursor advanced.
    PlanStepComplete {
        /// Index of the step that just completed.
        completed: usize,
        /// Text of the next step, if any remain.
        next: Option<String>,
        /// Total step count.
        total: usize,
    },
    /// The turn finished normally.
    Complete {
        /// Present only when a `task_complete` call ended the turn.
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    /// The turn aborted due to a model or transport error.
    Error {
        /// Human-readable error message.
        message: String,
    },
    /// The iteration ceiling was hit before the turn completed. Always
    /// followed by a summary-less [`TurnEvent::Complete`].
    MaxIterationsReached {
        /// The iteration count reached.
        current: u32,
    },
}
