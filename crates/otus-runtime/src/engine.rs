//! The iterative inference loop (§4.10).

use otus_context::{build_context, interrupted_tool_result, ContextBudgets, LogEntry};
use otus_core::Plan;
use otus_llm::LlmProvider;
use otus_tools::{ToolContext, ToolRegistry};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::events::TurnEvent;
use crate::session::Session;

const SYSTEM_PROMPT: &str = "You are otus, an agent that performs system-engineering tasks \
    against the user's workspace by provisioning sandboxes and driving terminals inside them. \
    Use the available tools to make progress; call task_complete once the task is done.";

const INITIAL_PROMPT_TEMPLATE: &str = "The user has asked for the following:\n\n{request}\n\n\
    Work the task using the available tools, then call task_complete when finished.";

const ACTION_PROMPT: &str = "You have not called a tool or finished the task. Use a tool to \
    make progress, or call task_complete if the task is already done.";

/// Everything the loop needs to run one `chat` call, borrowed for its
/// duration.
pub struct EngineDeps<'a> {
    /// Remote model client.
    pub llm: &'a dyn LlmProvider,
    /// Built-in tool registry.
    pub tools: &'a ToolRegistry,
    /// Shared tool dispatch context for this session.
    pub tool_ctx: &'a ToolContext,
    /// Context-builder budgets.
    pub budgets: &'a ContextBudgets,
    /// Cancelled when the owning session is closed (§5 "Cancellation").
    pub cancel: &'a CancellationToken,
}

/// Drive one turn of the inference loop, emitting [`TurnEvent`]s to `tx`
/// as it goes. Returns once the turn completes, errors, or exhausts its
/// iteration budget; never propagates an `Err` through the event channel
/// (§7 "the engine never re-throws through the event generator").
#[instrument(skip(session, user_text, deps, tx), fields(session_id = %session.id))]
pub async fn run_turn(
    session: &mut Session,
    user_text: String,
    deps: EngineDeps<'_>,
    tx: mpsc::Sender<TurnEvent>,
) {
    // Step 1: empty log gets the initial-prompt template; otherwise the
    // user's text is appended verbatim.
    let user_text = if session.log().is_empty() {
        INITIAL_PROMPT_TEMPLATE.replace("{request}", &user_text)
    } else {
        user_text
    };

    // Step 2: interrupted-turn repair, *before* appending the new user
    // message, so invariant (i) holds across the seam.
    let dangling = session.dangling_tool_call_ids();
    if !dangling.is_empty() {
        warn!(count = dangling.len(), "repairing interrupted turn");
        for id in dangling {
            session.push_log(interrupted_tool_result(id));
        }
    }

    session.push_log(LogEntry::User { text: user_text });

    let max_iterations = session.max_iterations;
    let mut turn_summary: Option<String> = None;
    let mut turn_complete = false;

    for iteration in 1..=max_iterations {
        if deps.cancel.is_cancelled() {
            return;
        }

        let _ = tx
            .send(TurnEvent::Iteration {
                current: iteration,
                max: max_iterations,
            })
            .await;

        let current_step = session.plan().and_then(Plan::current_step_text);
        let messages = build_context(
            SYSTEM_PROMPT,
            session.summary(),
            current_step,
            session.log(),
            deps.budgets,
        );
        let tool_defs = deps.tools.all_definitions();

        let response = tokio::select! {
            () = deps.cancel.cancelled() => return,
            result = deps.llm.complete(&messages, &tool_defs) => result,
        };

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                let _ = tx
                    .send(TurnEvent::Error {
                        message: err.to_string(),
                    })
                    .await;
                let _ = tx
                    .send(TurnEvent::Complete {
                        summary: Some(format!("Error: {err}")),
                    })
                    .await;
                return;
            },
        };

        // Step d: only persist the assistant turn when it carries tool
        // calls; free-form narration is transient (§4.10.d).
        if !response.tool_calls.is_empty() {
            session.push_log(LogEntry::Assistant {
                text: response.text.clone(),
                tool_calls: response.tool_calls.clone(),
            });
        }

        if let Some(text) = response.text.filter(|t| !t.is_empty()) {
            let _ = tx.send(TurnEvent::Thinking { text }).await;
        }

        if response.tool_calls.is_empty() {
            if turn_complete {
                break;
            }
            // Step h: no tool calls and no completion — prod the model.
            session.push_log(LogEntry::User {
                text: ACTION_PROMPT.to_owned(),
            });
            continue;
        }

        // Step f: execute this assistant's tool-call batch strictly in
        // order; results are appended in the same order (§5 "Tool-call
        // batches ... execute strictly in the order the model produced
        // them").
        for call in &response.tool_calls {
            if deps.cancel.is_cancelled() {
                return;
            }

            let _ = tx
                .send(TurnEvent::ToolCall {
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                })
                .await;

            let dispatch = deps
                .tools
                .dispatch(&call.name, call.arguments.clone(), deps.tool_ctx)
                .await;

            let (content, is_error) = match &dispatch {
                Ok(content) => (content.clone(), false),
                Err(err) => (err.to_string(), true),
            };

            let _ = tx
                .send(TurnEvent::ToolResult {
                    name: call.name.clone(),
                    result: content.clone(),
                    is_error,
                })
                .await;

            session.push_log(LogEntry::ToolResult {
                tool_call_id: call.id.clone(),
                content,
                is_error,
            });

            // §4.10.g: the engine inspects the `task_complete` call's own
            // arguments directly for the turn summary, rather than
            // relying on the handler's acknowledgement string.
            if call.name == "task_complete" && !is_error {
                if let Some(summary) = call.arguments.get("summary").and_then(|v| v.as_str()) {
                    turn_summary = Some(summary.to_owned());
                }
                turn_complete = true;
            }

            if call.name == "plan" && !is_error {
                if let Some(plan) = session.plan() {
                    let _ = tx
                        .send(TurnEvent::PlanCreated {
                            steps: plan.steps.clone(),
                            current_step: plan.current_step,
                        })
                        .await;
                }
            }
        }

        if turn_complete {
            break;
        }
    }

    if turn_complete {
        info!(summary = ?turn_summary, "turn complete");
        let _ = tx
            .send(TurnEvent::Complete {
                summary: turn_summary,
            })
            .await;
        return;
    }

    let _ = tx
        .send(TurnEvent::MaxIterationsReached {
            current: max_iterations,
        })
        .await;
    let _ = tx.send(TurnEvent::Complete { summary: None }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use otus_core::SandboxId;
    use otus_ignore::IgnorePatterns;
    use otus_llm::{CompletionResponse, Message, StopReason, ToolCall, ToolDefinition, Usage};
    use otus_sandbox::{SandboxBootParams, SandboxManager, TerminalMultiplexer};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    struct ScriptedProvider {
        responses: StdMutex<Vec<CompletionResponse>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> otus_llm::LlmResult<CompletionResponse> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(CompletionResponse {
                    text: None,
                    tool_calls: vec![],
                    stop_reason: StopReason::EndTurn,
                    usage: Usage::default(),
                });
            }
            Ok(responses.remove(0))
        }
    }

    fn test_tool_ctx() -> ToolContext {
        ToolContext::new(
            std::env::temp_dir(),
            Arc::new(SandboxManager::new(
                Arc::new(otus_vm::ProcessHypervisor::new(PathBuf::from("/nonexistent"))),
                None,
                None,
                SandboxBootParams {
                    control_socket_dir: std::env::temp_dir(),
                    kernel_image: PathBuf::from("/nonexistent"),
                    root_fs: PathBuf::from("/nonexistent"),
                    guest_rpc_port: 0,
                    rpc_timeout: Duration::from_millis(1),
                },
            )),
            Arc::new(TerminalMultiplexer::new()),
            IgnorePatterns::empty(),
        )
    }

    #[tokio::test]
    async fn task_complete_ends_the_turn_with_its_summary() {
        let provider = ScriptedProvider {
            responses: StdMutex::new(vec![CompletionResponse {
                text: Some("wrapping up".to_owned()),
                tool_calls: vec![ToolCall {
                    id: "t1".to_owned(),
                    name: "task_complete".to_owned(),
                    arguments: serde_json::json!({"summary": "did the thing"}),
                }],
                stop_reason: StopReason::ToolUse,
                usage: Usage::default(),
            }]),
        };

        let mut session = Session::new("test-model", 5);
        let tools = ToolRegistry::with_defaults();
        let tool_ctx = test_tool_ctx();
        let budgets = ContextBudgets::default();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(32);

        run_turn(
            &mut session,
            "do the thing".to_owned(),
            EngineDeps {
                llm: &provider,
                tools: &tools,
                tool_ctx: &tool_ctx,
                budgets: &budgets,
                cancel: &cancel,
            },
            tx,
        )
        .await;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(matches!(
            events.last(),
            Some(TurnEvent::Complete { summary: Some(s) }) if s == "did the thing"
        ));
    }

    #[tokio::test]
    async fn exhausting_iterations_reports_max_then_summary_less_complete() {
        let provider = ScriptedProvider {
            responses: StdMutex::new(vec![]),
        };
        let mut session = Session::new("test-model", 2);
        let tools = ToolRegistry::new();
        let tool_ctx = test_tool_ctx();
        let budgets = ContextBudgets::default();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(32);

        run_turn(
            &mut session,
            "go".to_owned(),
            EngineDeps {
                llm: &provider,
                tools: &tools,
                tool_ctx: &tool_ctx,
                budgets: &budgets,
                cancel: &cancel,
            },
            tx,
        )
        .await;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(events
            .iter()
            .any(|e| matches!(e, TurnEvent::MaxIterationsReached { current: 2 })));
        assert!(matches!(
            events.last(),
            Some(TurnEvent::Complete { summary: None })
        ));
    }

    #[tokio::test]
    async fn interrupted_turn_is_repaired_before_new_user_message() {
        let mut session = Session::new("test-model", 3);
        session.push_log(LogEntry::Assistant {
            text: None,
            tool_calls: vec![ToolCall {
                id: "t1".to_owned(),
                name: "wait".to_owned(),
                arguments: serde_json::json!({"duration": 60, "reason": "x"}),
            }],
        });

        let provider = ScriptedProvider {
            responses: StdMutex::new(vec![]),
        };
        let tools = ToolRegistry::new();
        let tool_ctx = test_tool_ctx();
        let budgets = ContextBudgets::default();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(32);

        run_turn(
            &mut session,
            "continue".to_owned(),
            EngineDeps {
                llm: &provider,
                tools: &tools,
                tool_ctx: &tool_ctx,
                budgets: &budgets,
                cancel: &cancel,
            },
            tx,
        )
        .await;
        while rx.recv().await.is_some() {}

        let log = session.log();
        assert!(matches!(
            &log[1],
            LogEntry::ToolResult { tool_call_id, content, is_error }
                if tool_call_id == "t1" && content == "Operation interrupted by user" && *is_error
        ));
        assert!(matches!(&log[2], LogEntry::User { text } if text == "continue"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop_without_emitting_complete() {
        let provider = ScriptedProvider {
            responses: StdMutex::new(vec![]),
        };
        let mut session = Session::new("test-model", 5);
        let tools = ToolRegistry::new();
        let tool_ctx = test_tool_ctx();
        let budgets = ContextBudgets::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, mut rx) = mpsc::channel(32);

        run_turn(
            &mut session,
            "go".to_owned(),
            EngineDeps {
                llm: &provider,
                tools: &tools,
                tool_ctx: &tool_ctx,
                budgets: &budgets,
                cancel: &cancel,
            },
            tx,
        )
        .await;

        assert!(rx.recv().await.is_none());
    }
}
