//! Session manager: opens/closes sessions and drives one `chat` call at a
//! time per session through the inference engine (§4.11 "Session manager").

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use otus_context::ContextBudgets;
use otus_core::SessionId;
use otus_ignore::IgnorePatterns;
use otus_llm::LlmProvider;
use otus_sandbox::{SandboxManager, TerminalMultiplexer};
use otus_tools::{ToolContext, ToolRegistry};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::engine::{run_turn, EngineDeps};
use crate::error::{RuntimeError, RuntimeResult};
use crate::events::TurnEvent;
use crate::session::Session;

struct SessionEntry {
    session: Mutex<Session>,
    tool_ctx: ToolContext,
    cancel: CancellationToken,
}

/// Owns every open session for one daemon instance and fans `chat` calls
/// out to the inference engine (§4.11).
///
/// `llm`, `tools`, and `budgets` are process-wide collaborators shared by
/// every session; each session additionally owns its own [`ToolContext`]
/// (sandbox manager, terminal multiplexer, ignore patterns, plan) so that
/// sandboxes and terminals never leak across sessions.
pub struct SessionManager {
    llm: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    budgets: ContextBudgets,
    sessions: Mutex<HashMap<SessionId, Arc<SessionEntry>>>,
}

impl SessionManager {
    /// Build a session manager around shared, process-wide collaborators.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, budgets: ContextBudgets) -> Self {
        Self {
            llm,
            tools,
            budgets,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Open a new session bound to one workspace's sandbox manager and
    /// terminal multiplexer (§4.11 `POST /sessions`).
    #[instrument(skip(self, sandbox_manager, terminal_mux, ignore_patterns))]
    pub async fn open(
        &self,
        workspace_root: PathBuf,
        sandbox_manager: Arc<SandboxManager>,
        terminal_mux: Arc<TerminalMultiplexer>,
        ignore_patterns: IgnorePatterns,
        max_iterations: u32,
    ) -> SessionId {
        let session = Session::new(self.llm.model(), max_iterations);
        let id = session.id;
        let tool_ctx = ToolContext::new(workspace_root, sandbox_manager, terminal_mux, ignore_patterns);
        let entry = Arc::new(SessionEntry {
            session: Mutex::new(session),
            tool_ctx,
            cancel: CancellationToken::new(),
        });
        self.sessions.lock().await.insert(id, entry);
        id
    }

    /// Close a session, cancelling its in-flight turn (if any) at the next
    /// suspension point (§5 "Cancellation").
    ///
    /// # Errors
    /// Returns [`RuntimeError::SessionNotFound`] if `id` isn't open.
    pub async fn close(&self, id: SessionId) -> RuntimeResult<()> {
        let entry = self
            .sessions
            .lock()
            .await
            .remove(&id)
            .ok_or_else(|| RuntimeError::SessionNotFound(id.to_string()))?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Every currently open session id.
    pub async fn list(&self) -> Vec<SessionId> {
        self.sessions.lock().await.keys().copied().collect()
    }

    /// Drive one `chat` turn for `id`, returning a receiver that yields
    /// [`TurnEvent`]s as the loop produces them (§4.11 SSE endpoint).
    ///
    /// Only one turn runs per session at a time: the per-session lock is
    /// held for the whole turn, so a second concurrent call queues behind
    /// the first rather than racing it (§5 "the loop is strictly
    /// sequential" within a session).
    ///
    /// # Errors
    /// Returns [`RuntimeError::SessionNotFound`] if `id` isn't open.
    pub async fn chat(
        &self,
        id: SessionId,
        user_text: String,
    ) -> RuntimeResult<mpsc::Receiver<TurnEvent>> {
        let entry = self
            .sessions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RuntimeError::SessionNotFound(id.to_string()))?;

        let (tx, rx) = mpsc::channel(256);
        let llm = Arc::clone(&self.llm);
        let tools = Arc::clone(&self.tools);
        let budgets = self.budgets;

        tokio::spawn(async move {
            let mut session = entry.session.lock().await;
            run_turn(
                &mut session,
                user_text,
                EngineDeps {
                    llm: llm.as_ref(),
                    tools: tools.as_ref(),
                    tool_ctx: &entry.tool_ctx,
                    budgets: &budgets,
                    cancel: &entry.cancel,
                },
                tx,
            )
            .await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use otus_llm::{CompletionResponse, Message, StopReason, ToolDefinition, Usage};
    use otus_vm::ProcessHypervisor;
    use std::time::Duration;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn model(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> otus_llm::LlmResult<CompletionResponse> {
            Ok(CompletionResponse {
                text: Some("done".to_owned()),
                tool_calls: vec![],
                stop_reason: StopReason::EndTurn,
                usage: Usage::default(),
            })
        }
    }

    fn test_sandbox_manager() -> Arc<SandboxManager> {
        Arc::new(SandboxManager::new(
            Arc::new(ProcessHypervisor::new(PathBuf::from("/nonexistent"))),
            None,
            None,
            otus_sandbox::SandboxBootParams {
                control_socket_dir: std::env::temp_dir(),
                kernel_image: PathBuf::from("/nonexistent"),
                root_fs: PathBuf::from("/nonexistent"),
                guest_rpc_port: 0,
                rpc_timeout: Duration::from_millis(1),
            },
        ))
    }

    #[tokio::test]
    async fn open_then_close_then_chat_reports_not_found() {
        let manager = SessionManager::new(
            Arc::new(EchoProvider),
            Arc::new(ToolRegistry::new()),
            ContextBudgets::default(),
        );
        let id = manager
            .open(
                std::env::temp_dir(),
                test_sandbox_manager(),
                Arc::new(TerminalMultiplexer::new()),
                IgnorePatterns::empty(),
                5,
            )
            .await;

        manager.close(id).await.unwrap();
        assert!(matches!(
            manager.chat(id, "hi".to_owned()).await,
            Err(RuntimeError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn chat_drains_to_a_terminal_complete_event() {
        let manager = SessionManager::new(
            Arc::new(EchoProvider),
            Arc::new(ToolRegistry::new()),
            ContextBudgets::default(),
        );
        let id = manager
            .open(
                std::env::temp_dir(),
                test_sandbox_manager(),
                Arc::new(TerminalMultiplexer::new()),
                IgnorePatterns::empty(),
                3,
            )
            .await;

        let mut rx = manager.chat(id, "hello".to_owned()).await.unwrap();
        let mut saw_complete = false;
        while let Some(event) = rx.recv().await {
            if matches!(event, TurnEvent::Complete { .. }) {
                saw_complete = true;
            }
        }
        assert!(saw_complete);
    }
}
