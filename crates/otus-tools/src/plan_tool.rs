//! `plan` (§4.9: "Replace session plan; cursor=0").

use otus_core::Plan;
use serde_json::Value;

use crate::{BuiltinTool, ToolContext, ToolError, ToolResult};

/// Replace the session's plan with a fresh ordered step list.
pub struct PlanTool;

#[async_trait::async_trait]
impl BuiltinTool for PlanTool {
    fn name(&self) -> &'static str {
        "plan"
    }

    fn description(&self) -> &'static str {
        "Replaces the current plan with an ordered list of steps, resetting progress to the \
         first step."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "steps": {
                    "type": "array",
                    "items": { "type": "string" }
                }
            },
            "required": ["steps"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let steps: Vec<String> = args
            .get("steps")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::InvalidArguments("steps is required".into()))?
            .iter()
            .map(|v| v.as_str().map(ToString::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ToolError::InvalidArguments("steps must be an array of strings".into()))?;

        if steps.is_empty() {
            return Err(ToolError::InvalidArguments("steps must not be empty".into()));
        }

        let count = steps.len();
        *ctx.plan.lock().await = Some(Plan::new(steps));
        Ok(format!("plan set with {count} steps"))
    }
}
