//! `wait` (§4.9: "Host-side sleep; surfaces reason to the user").

use std::time::Duration;

use serde_json::Value;
use tracing::info;

use crate::{BuiltinTool, ToolContext, ToolError, ToolResult};

/// Maximum sleep duration accepted, to keep a single tool call bounded.
const MAX_WAIT_SECS: u64 = 600;

/// Sleep for a bounded duration, surfacing the stated reason.
pub struct WaitTool;

#[async_trait::async_trait]
impl BuiltinTool for WaitTool {
    fn name(&self) -> &'static str {
        "wait"
    }

    fn description(&self) -> &'static str {
        "Pauses for a number of seconds, e.g. while a background process finishes. Always \
         give a short reason so the user understands what's happening."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "duration": {
                    "type": "integer",
                    "description": "Seconds to wait (max 600)"
                },
                "reason": { "type": "string" }
            },
            "required": ["duration", "reason"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
        let duration = args
            .get("duration")
            .and_then(Value::as_u64)
            .ok_or_else(|| ToolError::InvalidArguments("duration is required".into()))?
            .min(MAX_WAIT_SECS);
        let reason = args
            .get("reason")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("reason is required".into()))?;

        info!(duration, reason, "wait tool sleeping");
        tokio::time::sleep(Duration::from_secs(duration)).await;
        Ok(format!("waited {duration}s: {reason}"))
    }
}
