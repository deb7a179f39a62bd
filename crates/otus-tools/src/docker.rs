//! `docker` (§4.9: "Run docker CLI on host with CWD=workspace").

use serde_json::Value;
use tokio::process::Command;

use crate::{BuiltinTool, ToolContext, ToolError, ToolResult};

/// Run a `docker` subcommand against the host daemon, rooted at the
/// workspace. The command may be given as a single string (split on
/// whitespace) or an argv array.
pub struct DockerTool;

#[async_trait::async_trait]
impl BuiltinTool for DockerTool {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn description(&self) -> &'static str {
        "Runs a docker CLI command on the host with the working directory set to the \
         workspace root."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "description": "Docker subcommand and args, as a string or argv array"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let argv = parse_command(args.get("command"))
            .ok_or_else(|| ToolError::InvalidArguments("command is required".into()))?;
        if argv.is_empty() {
            return Err(ToolError::InvalidArguments("command must not be empty".into()));
        }

        let output = Command::new("docker")
            .args(&argv)
            .current_dir(&ctx.workspace_root)
            .output()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        let mut result = String::new();
        if !stdout.is_empty() {
            result.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str("STDERR:\n");
            result.push_str(&stderr);
        }
        if exit_code != 0 {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str(&format!("(exit code: {exit_code})"));
        }
        if result.is_empty() {
            result.push_str("(no output)");
        }
        Ok(result)
    }
}

fn parse_command(value: Option<&Value>) -> Option<Vec<String>> {
    match value? {
        Value::String(s) => Some(s.split_whitespace().map(ToString::to_string).collect()),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(ToString::to_string))
            .collect(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_command_splits_on_whitespace() {
        assert_eq!(
            parse_command(Some(&Value::String("ps -a".to_string()))),
            Some(vec!["ps".to_string(), "-a".to_string()])
        );
    }

    #[test]
    fn argv_command_passes_through() {
        let value = serde_json::json!(["ps", "-a"]);
        assert_eq!(
            parse_command(Some(&value)),
            Some(vec!["ps".to_string(), "-a".to_string()])
        );
    }

    #[test]
    fn missing_command_is_none() {
        assert_eq!(parse_command(None), None);
    }
}
