//! `task_complete` (§4.9: "Mark task done; persist reflection; terminates
//! the turn").
//!
//! The handler itself only acknowledges the call — the inference engine
//! (§4.10.g) inspects the original tool call's arguments directly to set
//! the turn summary and stop iterating, since that decision belongs to
//! the loop, not to a side channel out of the tool dispatch result.

use serde_json::Value;

use crate::{BuiltinTool, ToolContext, ToolError, ToolResult};

/// Acknowledge task completion. Reflection content (`lessons`) is
/// returned as a tool result so it lands in the log like any other
/// observation; the episodic store write is an external collaborator.
pub struct TaskCompleteTool;

#[async_trait::async_trait]
impl BuiltinTool for TaskCompleteTool {
    fn name(&self) -> &'static str {
        "task_complete"
    }

    fn description(&self) -> &'static str {
        "Marks the current task as complete and ends the turn. Provide a summary of what was \
         accomplished, and optionally lessons learned for future tasks."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string" },
                "lessons": { "type": "string" }
            },
            "required": ["summary"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
        let summary = args
            .get("summary")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("summary is required".into()))?;
        Ok(format!("task complete: {summary}"))
    }
}
