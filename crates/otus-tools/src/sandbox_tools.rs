//! `start_sandbox` / `stop_sandbox` (§4.9).

use serde_json::Value;

use crate::{BuiltinTool, ToolContext, ToolError, ToolResult};

/// Obtain a sandbox from the pool, or boot a fresh one inline; pushes the
/// workspace into it by default.
pub struct StartSandboxTool;

#[async_trait::async_trait]
impl BuiltinTool for StartSandboxTool {
    fn name(&self) -> &'static str {
        "start_sandbox"
    }

    fn description(&self) -> &'static str {
        "Obtains a sandbox from the pre-warmed pool, or boots a fresh one if none is \
         available. By default pushes the current workspace into it."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Optional human-readable name for the sandbox"
                },
                "pushWorkspace": {
                    "type": "boolean",
                    "description": "Whether to push the workspace into the sandbox (default true)"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let push_workspace = args
            .get("pushWorkspace")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let patterns = ctx.ignore_patterns.lock().await.clone();
        let id = ctx
            .sandbox_manager
            .start_sandbox(
                name.clone(),
                push_workspace,
                Some(&ctx.workspace_root),
                Some(&patterns),
            )
            .await?;

        let info = ctx
            .sandbox_manager
            .list_sandboxes()
            .await
            .into_iter()
            .find(|s| s.id == id);

        let (ip, synced) = info
            .map(|i| (i.guest_ip, i.workspace_synced))
            .unwrap_or((None, false));

        Ok(format!(
            "started sandbox {id}{name_suffix}, ip={ip}, workspace_synced={synced}",
            name_suffix = name.map(|n| format!(" ({n})")).unwrap_or_default(),
            ip = ip.as_deref().unwrap_or("none"),
        ))
    }
}

/// Stop the active (or given) sandbox; syncs the workspace back first by
/// default.
pub struct StopSandboxTool;

#[async_trait::async_trait]
impl BuiltinTool for StopSandboxTool {
    fn name(&self) -> &'static str {
        "stop_sandbox"
    }

    fn description(&self) -> &'static str {
        "Stops the active sandbox (or the one given), syncing the workspace back first by \
         default."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "sandboxId": {
                    "type": "string",
                    "description": "Sandbox id; defaults to the active sandbox"
                },
                "syncBack": {
                    "type": "boolean",
                    "description": "Whether to pull the workspace back before stopping (default true)"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let id = ctx.resolve_sandbox(&args).await?;
        let sync_back = args
            .get("syncBack")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let patterns = ctx.ignore_patterns.lock().await.clone();
        ctx.sandbox_manager
            .stop_sandbox(&id, sync_back, Some(&ctx.workspace_root), Some(&patterns))
            .await
            .map_err(ToolError::from)?;
        ctx.terminal_mux.forget_sandbox(&id).await;

        Ok(format!("stopped sandbox {id}"))
    }
}
