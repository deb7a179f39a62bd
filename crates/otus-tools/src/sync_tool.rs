//! `sync_workspace` (§4.9, §4.2).

use serde_json::Value;

use crate::{BuiltinTool, ToolContext, ToolError, ToolResult};

/// Push or pull the workspace against the active (or given) sandbox.
pub struct SyncWorkspaceTool;

#[async_trait::async_trait]
impl BuiltinTool for SyncWorkspaceTool {
    fn name(&self) -> &'static str {
        "sync_workspace"
    }

    fn description(&self) -> &'static str {
        "Synchronises the workspace with a sandbox. direction=to_sandbox pushes the host \
         workspace in; direction=from_sandbox pulls the sandbox's /workspace back, \
         reconciling the host tree to mirror it for the synced subset."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "direction": {
                    "type": "string",
                    "enum": ["to_sandbox", "from_sandbox"]
                },
                "sandboxId": {
                    "type": "string",
                    "description": "Sandbox id; defaults to the active sandbox"
                }
            },
            "required": ["direction"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let direction = args
            .get("direction")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("direction is required".into()))?;

        let id = ctx.resolve_sandbox(&args).await?;
        let patterns = ctx.ignore_patterns.lock().await.clone();

        let rpc = ctx
            .sandbox_manager
            .with_rpc(&id, |rpc| rpc.clone())
            .await
            .map_err(ToolError::from)?;

        match direction {
            "to_sandbox" => {
                let compiled = patterns.compile()?;
                let report = otus_sync::sync_to_sandbox(&rpc, &ctx.workspace_root, &compiled)
                    .await
                    .map_err(ToolError::from)?;
                Ok(format!("pushed {} files to sandbox", report.files_written))
            },
            "from_sandbox" => {
                let report = otus_sync::sync_from_sandbox(&rpc, &ctx.workspace_root, &patterns)
                    .await
                    .map_err(ToolError::from)?;
                Ok(format!("pulled {} paths from sandbox", report.paths_synced))
            },
            other => Err(ToolError::InvalidArguments(format!(
                "unknown sync direction: {other}"
            ))),
        }
    }
}
