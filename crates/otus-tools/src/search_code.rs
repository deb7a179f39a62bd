//! `search_code` (§4.9: "Call semantic store").
//!
//! The semantic index (embedding vectors + nearest-neighbour query) is an
//! external collaborator, out of scope here; this module only defines the
//! boundary the tool needs and a thin adapter over it.

use serde_json::Value;

use crate::{BuiltinTool, ToolContext, ToolError, ToolResult};

/// One ranked code snippet returned by the semantic store.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Workspace-relative file path.
    pub path: String,
    /// Matched snippet text.
    pub snippet: String,
    /// Relevance score, higher is more relevant.
    pub score: f64,
}

/// Abstraction over the semantic index query path.
#[async_trait::async_trait]
pub trait SemanticStore: Send + Sync {
    /// Return up to `limit` ranked snippets relevant to `query`.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, String>;
}

/// Default result count when the caller doesn't specify one.
const DEFAULT_LIMIT: usize = 8;

/// Query the semantic index for relevant code snippets.
pub struct SearchCodeTool;

#[async_trait::async_trait]
impl BuiltinTool for SearchCodeTool {
    fn name(&self) -> &'static str {
        "search_code"
    }

    fn description(&self) -> &'static str {
        "Semantically searches the indexed workspace and returns ranked code snippets."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("query is required".into()))?;
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(DEFAULT_LIMIT);

        let store = ctx
            .semantic_store
            .as_ref()
            .ok_or_else(|| ToolError::Unavailable("semantic code search".to_string()))?;

        let results = store
            .search(query, limit)
            .await
            .map_err(ToolError::ExecutionFailed)?;

        if results.is_empty() {
            return Ok("(no matches)".to_string());
        }

        Ok(results
            .into_iter()
            .map(|r| format!("{} (score={:.3}):\n{}", r.path, r.score, r.snippet))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}
