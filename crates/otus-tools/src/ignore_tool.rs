//! `get_otusignore` (§4.9).

use serde_json::Value;

use crate::{BuiltinTool, ToolContext, ToolResult};

/// Return the workspace's active ignore patterns.
pub struct GetOtusIgnoreTool;

#[async_trait::async_trait]
impl BuiltinTool for GetOtusIgnoreTool {
    fn name(&self) -> &'static str {
        "get_otusignore"
    }

    fn description(&self) -> &'static str {
        "Returns the active .otusignore patterns for the current workspace."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> ToolResult {
        let patterns = ctx.ignore_patterns.lock().await;
        if patterns.patterns().is_empty() {
            return Ok("(no ignore patterns configured)".to_string());
        }
        Ok(patterns.to_lines().join("\n"))
    }
}
