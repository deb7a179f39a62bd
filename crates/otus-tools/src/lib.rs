//! Built-in tool registry and handlers for the otus agent loop (§4.9).
//!
//! A tool is `{name, human description, JSON-Schema parameters}`; the
//! registry holds the canonical set the model sees unchanged on every
//! call. Unknown tool names are surfaced as a tool-result error rather
//! than a fatal failure — see [`ToolRegistry::dispatch`].

mod docker;
mod ignore_tool;
mod plan_tool;
mod sandbox_tools;
mod search_code;
mod sync_tool;
mod task_complete;
mod terminal_tools;
mod wait;

pub use search_code::{SearchResult, SemanticStore};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use otus_core::{Plan, SandboxId};
use otus_ignore::IgnorePatterns;
use otus_sandbox::{SandboxManager, TerminalMultiplexer};
use serde_json::Value;
use tokio::sync::Mutex;

/// Errors raised while executing a built-in tool.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The arguments did not match the tool's schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Sandbox lifecycle or RPC failure.
    #[error("sandbox error: {0}")]
    Sandbox(#[from] otus_sandbox::SandboxError),

    /// Workspace sync failure.
    #[error("sync error: {0}")]
    Sync(#[from] otus_sync::SyncError),

    /// Ignore pattern parsing failure.
    #[error("ignore pattern error: {0}")]
    Ignore(#[from] otus_ignore::IgnoreError),

    /// Local process (e.g. `docker`) failed to spawn or run.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The requested name has no registered handler.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A dependency this tool needs (e.g. the semantic store) was not
    /// configured for this daemon instance.
    #[error("{0} is not available")]
    Unavailable(String),
}

/// Result type for tool execution.
pub type ToolResult = Result<String, ToolError>;

/// A built-in tool that executes directly in-process against the shared
/// [`ToolContext`] (no MCP indirection — every tool name is a plain
/// identifier per §4.9).
#[async_trait::async_trait]
pub trait BuiltinTool: Send + Sync {
    /// Tool name, exactly as the model must call it.
    fn name(&self) -> &'static str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &'static str;

    /// JSON-Schema describing the tool's input.
    fn input_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult;
}

/// Shared state and collaborators every built-in tool may reach (§4.9,
/// §5 "Shared resources").
pub struct ToolContext {
    /// Workspace root directory on the host.
    pub workspace_root: PathBuf,
    /// Sandbox manager backing `start_sandbox`/`stop_sandbox` and every
    /// sandbox-targeted tool.
    pub sandbox_manager: Arc<SandboxManager>,
    /// Terminal multiplexer backing the five terminal tools.
    pub terminal_mux: Arc<TerminalMultiplexer>,
    /// Active ignore pattern set, reloadable by the owning session.
    pub ignore_patterns: Arc<Mutex<IgnorePatterns>>,
    /// The session's current plan, replaced wholesale by the `plan` tool.
    pub plan: Arc<Mutex<Option<Plan>>>,
    /// Semantic code search backend (external collaborator, §1 "semantic
    /// storage" — out of scope here beyond this call boundary). `None`
    /// when the daemon instance has no index configured.
    pub semantic_store: Option<Arc<dyn SemanticStore>>,
}

impl ToolContext {
    /// Build a tool context for one session.
    #[must_use]
    pub fn new(
        workspace_root: PathBuf,
        sandbox_manager: Arc<SandboxManager>,
        terminal_mux: Arc<TerminalMultiplexer>,
        ignore_patterns: IgnorePatterns,
    ) -> Self {
        Self {
            workspace_root,
            sandbox_manager,
            terminal_mux,
            ignore_patterns: Arc::new(Mutex::new(ignore_patterns)),
            plan: Arc::new(Mutex::new(None)),
            semantic_store: None,
        }
    }

    /// Resolve a sandbox id argument, falling back to the active sandbox
    /// when the field is absent (§4.9 "active (or id)").
    async fn resolve_sandbox(&self, args: &Value) -> Result<SandboxId, ToolError> {
        let id = args
            .get("sandboxId")
            .and_then(Value::as_str)
            .map(|s| SandboxId::from(s.to_string()));
        self.sandbox_manager
            .resolve(id.as_ref())
            .await
            .map_err(ToolError::from)
    }
}

/// Registry of built-in tools for lookup and schema export to the model.
pub struct ToolRegistry {
    tools: HashMap<&'static str, Box<dyn BuiltinTool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Build the registry with every tool from the §4.9 table registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(sandbox_tools::StartSandboxTool));
        registry.register(Box::new(sandbox_tools::StopSandboxTool));
        registry.register(Box::new(sync_tool::SyncWorkspaceTool));
        registry.register(Box::new(ignore_tool::GetOtusIgnoreTool));
        registry.register(Box::new(terminal_tools::StartTerminalTool));
        registry.register(Box::new(terminal_tools::SendToTerminalTool));
        registry.register(Box::new(terminal_tools::ReadTerminalTool));
        registry.register(Box::new(terminal_tools::ListTerminalsTool));
        registry.register(Box::new(terminal_tools::KillTerminalTool));
        registry.register(Box::new(wait::WaitTool));
        registry.register(Box::new(search_code::SearchCodeTool));
        registry.register(Box::new(docker::DockerTool));
        registry.register(Box::new(plan_tool::PlanTool));
        registry.register(Box::new(task_complete::TaskCompleteTool));
        registry
    }

    /// Register (or replace) a tool.
    pub fn register(&mut self, tool: Box<dyn BuiltinTool>) {
        self.tools.insert(tool.name(), tool);
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn BuiltinTool> {
        self.tools.get(name).map(AsRef::as_ref)
    }

    /// Export every registered tool's definition for the model (§4.9 "the
    /// model sees it unchanged each call").
    #[must_use]
    pub fn all_definitions(&self) -> Vec<otus_llm::ToolDefinition> {
        self.tools
            .values()
            .map(|t| otus_llm::ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Dispatch `name` with `args`. An unrecognised name surfaces as a
    /// tool-result error rather than panicking or propagating, matching
    /// the engine's policy that only model/transport errors end a turn
    /// (§4.9 "Unknown tool name", §7).
    pub async fn dispatch(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        match self.get(name) {
            Some(tool) => tool.execute(args, ctx).await,
            None => Err(ToolError::UnknownTool(name.to_string())),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_defaults_registers_every_builtin_tool() {
        let registry = ToolRegistry::with_defaults();
        let names = [
            "start_sandbox",
            "stop_sandbox",
            "sync_workspace",
            "get_otusignore",
            "start_terminal",
            "send_to_terminal",
            "read_terminal",
            "list_terminals",
            "kill_terminal",
            "wait",
            "search_code",
            "docker",
            "plan",
            "task_complete",
        ];
        for name in names {
            assert!(registry.get(name).is_some(), "missing tool {name}");
        }
        assert_eq!(registry.all_definitions().len(), names.len());
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_a_result_error_not_a_panic() {
        let registry = ToolRegistry::new();
        let ctx = ToolContext::new(
            std::env::temp_dir(),
            Arc::new(SandboxManager::new(
                Arc::new(otus_vm::ProcessHypervisor::new(PathBuf::from("/nonexistent"))),
                None,
                None,
                otus_sandbox::SandboxBootParams {
                    control_socket_dir: std::env::temp_dir(),
                    kernel_image: PathBuf::from("/nonexistent"),
                    root_fs: PathBuf::from("/nonexistent"),
                    guest_rpc_port: 0,
                    rpc_timeout: std::time::Duration::from_millis(1),
                },
            )),
            Arc::new(TerminalMultiplexer::new()),
            IgnorePatterns::empty(),
        );
        let result = registry.dispatch("does_not_exist", Value::Null, &ctx).await;
        assert!(matches!(result, Err(ToolError::UnknownTool(name)) if name == "does_not_exist"));
    }
}
