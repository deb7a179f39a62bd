//! Terminal tools: thin wrappers over [`otus_sandbox::TerminalMultiplexer`]
//! (§4.7, §4.9).

use otus_sandbox::DEFAULT_READ_LINES;
use serde_json::Value;

use crate::{BuiltinTool, ToolContext, ToolError, ToolResult};

/// Create a named persistent shell session in the active sandbox.
pub struct StartTerminalTool;

#[async_trait::async_trait]
impl BuiltinTool for StartTerminalTool {
    fn name(&self) -> &'static str {
        "start_terminal"
    }

    fn description(&self) -> &'static str {
        "Starts a named persistent terminal session in the active sandbox. Starting a \
         session that already exists is a no-op success."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "sandboxId": { "type": "string" }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("name is required".into()))?;
        let id = ctx.resolve_sandbox(&args).await?;

        let rpc = ctx
            .sandbox_manager
            .with_rpc(&id, |rpc| rpc.clone())
            .await
            .map_err(ToolError::from)?;

        ctx.terminal_mux.start_terminal(&rpc, &id, name).await?;
        Ok(format!("terminal '{name}' ready"))
    }
}

/// Forward a command to a running session.
pub struct SendToTerminalTool;

#[async_trait::async_trait]
impl BuiltinTool for SendToTerminalTool {
    fn name(&self) -> &'static str {
        "send_to_terminal"
    }

    fn description(&self) -> &'static str {
        "Sends a command to a named terminal session in the active sandbox."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "command": { "type": "string" },
                "sandboxId": { "type": "string" }
            },
            "required": ["name", "command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("name is required".into()))?;
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("command is required".into()))?;
        let id = ctx.resolve_sandbox(&args).await?;

        let rpc = ctx
            .sandbox_manager
            .with_rpc(&id, |rpc| rpc.clone())
            .await
            .map_err(ToolError::from)?;

        ctx.terminal_mux.send_to_terminal(&rpc, name, command).await?;
        Ok("sent".to_string())
    }
}

/// Read output from a terminal session.
pub struct ReadTerminalTool;

#[async_trait::async_trait]
impl BuiltinTool for ReadTerminalTool {
    fn name(&self) -> &'static str {
        "read_terminal"
    }

    fn description(&self) -> &'static str {
        "Reads output from a named terminal session. Incremental by default: returns only \
         output produced since the last read. Pass incremental=false for the full capture."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "incremental": { "type": "boolean" },
                "lines": { "type": "integer" },
                "sandboxId": { "type": "string" }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("name is required".into()))?;
        let incremental = args
            .get("incremental")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let lines = args
            .get("lines")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(DEFAULT_READ_LINES);
        let id = ctx.resolve_sandbox(&args).await?;

        let rpc = ctx
            .sandbox_manager
            .with_rpc(&id, |rpc| rpc.clone())
            .await
            .map_err(ToolError::from)?;

        let read = ctx
            .terminal_mux
            .read_terminal(&rpc, &id, name, incremental, lines)
            .await?;

        if read.lines.is_empty() {
            return Ok("(no new output)".to_string());
        }
        Ok(read.lines.join("\n"))
    }
}

/// List every terminal session in the sandbox.
pub struct ListTerminalsTool;

#[async_trait::async_trait]
impl BuiltinTool for ListTerminalsTool {
    fn name(&self) -> &'static str {
        "list_terminals"
    }

    fn description(&self) -> &'static str {
        "Lists terminal sessions currently running in the active sandbox."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "sandboxId": { "type": "string" } }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let id = ctx.resolve_sandbox(&args).await?;
        let rpc = ctx
            .sandbox_manager
            .with_rpc(&id, |rpc| rpc.clone())
            .await
            .map_err(ToolError::from)?;

        let sessions = ctx.terminal_mux.list_terminals(&rpc).await?;
        if sessions.is_empty() {
            return Ok("(no terminal sessions)".to_string());
        }
        Ok(sessions
            .into_iter()
            .map(|s| format!("{} (alive={})", s.name, s.alive))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Kill a terminal session.
pub struct KillTerminalTool;

#[async_trait::async_trait]
impl BuiltinTool for KillTerminalTool {
    fn name(&self) -> &'static str {
        "kill_terminal"
    }

    fn description(&self) -> &'static str {
        "Terminates a named terminal session in the active sandbox."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "sandboxId": { "type": "string" }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("name is required".into()))?;
        let id = ctx.resolve_sandbox(&args).await?;
        let rpc = ctx
            .sandbox_manager
            .with_rpc(&id, |rpc| rpc.clone())
            .await
            .map_err(ToolError::from)?;

        ctx.terminal_mux.kill_terminal(&rpc, &id, name).await?;
        Ok(format!("killed terminal '{name}'"))
    }
}
