//! Per-session conversation state (§3 "Session", "Message log entry").

use otus_context::LogEntry;
use otus_core::{Plan, SessionId, TaskId};

/// A session's durable state: identity, message log, plan, and summary.
///
/// Ownership (§3): a session exclusively owns its message log, plan, and
/// summary; mutated only by the owning inference loop driving its turns.
pub struct Session {
    /// Opaque session identifier.
    pub id: SessionId,
    /// Reference to this session's task in the episodic log (external
    /// collaborator; only the identifier is carried here).
    pub task_id: TaskId,
    /// Model identifier this session was opened with.
    pub model: String,
    /// Upper bound on inference-loop iterations per turn.
    pub max_iterations: u32,
    /// Ordered append-only (with defined exceptions, §4.5 interruption)
    /// message log.
    log: Vec<LogEntry>,
    /// Current plan, if the model has called `plan` at least once.
    plan: Option<Plan>,
    /// Rolling session summary, emitted by the context builder as a
    /// system message when non-empty.
    summary: String,
}

impl Session {
    /// Open a new session.
    #[must_use]
    pub fn new(model: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            id: SessionId::new(),
            task_id: TaskId::new(),
            model: model.into(),
            max_iterations,
            log: Vec::new(),
            plan: None,
            summary: String::new(),
        }
    }

    /// Borrow the message log.
    #[must_use]
    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// Append one entry to the log.
    pub fn push_log(&mut self, entry: LogEntry) {
        self.log.push(entry);
    }

    /// The current plan, if any.
    #[must_use]
    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    /// Replace the plan wholesale (`plan` tool, §4.9: "cursor=0").
    pub fn set_plan(&mut self, plan: Plan) {
        self.plan = Some(plan);
    }

    /// The rolling summary, or `None` if empty (§4.8 step 2 treats an
    /// empty summary as absent).
    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        Some(self.summary.as_str()).filter(|s| !s.is_empty())
    }

    /// Replace the rolling summary.
    pub fn set_summary(&mut self, summary: String) {
        self.summary = summary;
    }

    /// §3 invariant (ii): whether the log's first non-system entry is
    /// `user`. True vacuously for an empty log.
    #[must_use]
    pub fn starts_with_user_or_empty(&self) -> bool {
        self.log
            .iter()
            .find(|e| !matches!(e, LogEntry::System { .. }))
            .is_none_or(|e| matches!(e, LogEntry::User { .. }))
    }

    /// The ids of tool calls in the final assistant log entry that have no
    /// matching `tool_result` yet — a turn cut off mid-execution
    /// (§4.5/§4.10.2 "interrupted-turn repair").
    #[must_use]
    pub fn dangling_tool_call_ids(&self) -> Vec<String> {
        let Some(LogEntry::Assistant { tool_calls, .. }) = self.log.last() else {
            return Vec::new();
        };
        if tool_calls.is_empty() {
            return Vec::new();
        }
        tool_calls.iter().map(|tc| tc.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otus_llm::ToolCall;

    #[test]
    fn new_session_starts_with_user_vacuously() {
        let session = Session::new("gpt-4o-mini", 25);
        assert!(session.starts_with_user_or_empty());
        assert!(session.dangling_tool_call_ids().is_empty());
    }

    #[test]
    fn dangling_tool_calls_detected_from_trailing_assistant_entry() {
        let mut session = Session::new("gpt-4o-mini", 25);
        session.push_log(LogEntry::User {
            text: "go".to_owned(),
        });
        session.push_log(LogEntry::Assistant {
            text: None,
            tool_calls: vec![ToolCall {
                id: "t1".to_owned(),
                name: "wait".to_owned(),
                arguments: serde_json::json!({}),
            }],
        });
        assert_eq!(session.dangling_tool_call_ids(), vec!["t1".to_owned()]);
    }

    #[test]
    fn no_dangling_calls_once_results_are_appended() {
        let mut session = Session::new("gpt-4o-mini", 25);
        session.push_log(LogEntry::Assistant {
            text: None,
            tool_calls: vec![ToolCall {
                id: "t1".to_owned(),
                name: "wait".to_owned(),
                arguments: serde_json::json!({}),
            }],
        });
        session.push_log(LogEntry::ToolResult {
            tool_call_id: "t1".to_owned(),
            content: "ok".to_owned(),
            is_error: false,
        });
        assert!(session.dangling_tool_call_ids().is_empty());
    }

    #[test]
    fn empty_summary_reads_as_none() {
        let mut session = Session::new("m", 10);
        assert_eq!(session.summary(), None);
        session.set_summary("prior context".to_owned());
        assert_eq!(session.summary(), Some("prior context"));
    }
}
