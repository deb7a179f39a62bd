//! Atomic-group-preserving, character-budgeted context assembly (§4.8).

use otus_llm::{Message, ToolCallResult};

use crate::types::{ContextBudgets, LogEntry};

const INTERRUPTED_TURN_NOTICE: &str = "Operation interrupted by user";
const CONTINUE_PROMPT: &str = "Continue working on the current task. Use tools to make progress.";

/// Assemble the message sequence sent to the model for one inference
/// iteration.
///
/// Steps (§4.8):
/// 1. Always start with the system prompt (uncounted toward any budget).
/// 2. Append the rolling summary, truncated to `max_summary_chars`, if any.
/// 3. Append a one-line "current step" note, if any.
/// 4. Segment the log into atomic groups: an assistant turn with tool calls
///    plus all tool results it produced form one group; everything else is
///    a singleton group.
/// 5. Normalize any oversized tool result within a group.
/// 6. Select the latest groups whose cumulative size fits
///    `min(max_total_chars - emitted_system, max_recent_chars)` and whose
///    message count fits `max_recent_messages`, always keeping at least the
///    single latest group even if it alone exceeds the budget.
/// 7. If the first selected entry isn't a user message, insert a synthetic
///    one ahead of it so the model always sees a turn to respond to.
#[must_use]
pub fn build_context(
    system_prompt: &str,
    summary: Option<&str>,
    current_step: Option<&str>,
    log: &[LogEntry],
    budgets: &ContextBudgets,
) -> Vec<Message> {
    let mut messages = vec![Message::system(system_prompt)];
    let mut emitted_system_chars = 0usize;

    if let Some(summary) = summary.filter(|s| !s.is_empty()) {
        let truncated = truncate_chars(summary, budgets.max_summary_chars);
        emitted_system_chars += truncated.chars().count();
        messages.push(Message::system(truncated));
    }

    if let Some(step) = current_step.filter(|s| !s.is_empty()) {
        emitted_system_chars += step.chars().count();
        messages.push(Message::system(step.to_owned()));
    }

    let mut groups = group_log(log);
    for group in &mut groups {
        normalize_oversized_tool_results(group, budgets.max_tool_result_chars);
    }

    let char_budget = budgets
        .max_total_chars
        .saturating_sub(emitted_system_chars)
        .min(budgets.max_recent_chars);

    let recent = select_recent_groups(groups, char_budget, budgets.max_recent_messages);
    let mut recent_messages: Vec<Message> = recent
        .into_iter()
        .flatten()
        .map(to_wire_message)
        .collect();

    let starts_with_user = matches!(
        recent_messages.first(),
        Some(m) if matches!(m.role, otus_llm::MessageRole::User)
    );
    if !starts_with_user {
        recent_messages.insert(0, Message::user(CONTINUE_PROMPT));
    }

    messages.extend(recent_messages);
    messages
}

/// Segment a log into atomic groups, in original order.
fn group_log(log: &[LogEntry]) -> Vec<Vec<LogEntry>> {
    let mut groups = Vec::new();
    let mut i = 0;
    while i < log.len() {
        if let LogEntry::Assistant { tool_calls, .. } = &log[i] {
            if !tool_calls.is_empty() {
                let mut pending: Vec<&str> = tool_calls.iter().map(|tc| tc.id.as_str()).collect();
                let mut group = vec![log[i].clone()];
                i += 1;
                while !pending.is_empty() && i < log.len() {
                    let Some(pos) = matching_tool_result(&log[i], &pending) else {
                        break;
                    };
                    pending.remove(pos);
                    group.push(log[i].clone());
                    i += 1;
                }
                groups.push(group);
                continue;
            }
        }
        groups.push(vec![log[i].clone()]);
        i += 1;
    }
    groups
}

fn matching_tool_result(entry: &LogEntry, pending: &[&str]) -> Option<usize> {
    match entry {
        LogEntry::ToolResult { tool_call_id, .. } => {
            pending.iter().position(|id| *id == tool_call_id)
        }
        _ => None,
    }
}

/// Replace any tool result content over `max_chars` with a head/tail
/// excerpt joined by a truncation marker.
fn normalize_oversized_tool_results(group: &mut [LogEntry], max_chars: usize) {
    for entry in group {
        if let LogEntry::ToolResult { content, .. } = entry {
            if content.chars().count() > max_chars {
                *content = ellipsize(content, max_chars);
            }
        }
    }
}

fn ellipsize(content: &str, max_chars: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    let total = chars.len();
    let head_len = max_chars / 2;
    let tail_len = max_chars - head_len;
    let head: String = chars[..head_len].iter().collect();
    let tail: String = chars[total.saturating_sub(tail_len)..].iter().collect();
    let truncated = total - head_len - tail_len;
    format!("{head}… [truncated {truncated} characters] …{tail}")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    ellipsize(text, max_chars)
}

fn group_char_len(group: &[LogEntry]) -> usize {
    group.iter().map(LogEntry::char_len).sum()
}

/// Walk groups from newest to oldest, keeping as many as fit the budgets.
/// The single newest group is always kept, even if it alone overruns
/// `char_budget`, so a lone oversized tool result never empties the context.
fn select_recent_groups(
    groups: Vec<Vec<LogEntry>>,
    char_budget: usize,
    max_messages: usize,
) -> Vec<Vec<LogEntry>> {
    let mut selected = Vec::new();
    let mut total_chars = 0usize;
    let mut total_messages = 0usize;

    for group in groups.into_iter().rev() {
        let chars = group_char_len(&group);
        let messages = group.len();

        if selected.is_empty() {
            total_chars += chars;
            total_messages += messages;
            selected.push(group);
            continue;
        }

        if total_chars + chars > char_budget || total_messages + messages > max_messages {
            break;
        }

        total_chars += chars;
        total_messages += messages;
        selected.push(group);
    }

    selected.reverse();
    selected
}

fn to_wire_message(entry: LogEntry) -> Message {
    match entry {
        LogEntry::User { text } => Message::user(text),
        LogEntry::System { text } => Message::system(text),
        LogEntry::Assistant { text, tool_calls } => Message::assistant_with_tools(text, tool_calls),
        LogEntry::ToolResult {
            tool_call_id,
            content,
            is_error,
        } => Message::tool_result(ToolCallResult {
            call_id: tool_call_id,
            content,
            is_error,
        }),
    }
}

/// Build a synthetic tool-result entry recording that a pending call was
/// cut short by an interrupted turn (§4.10 repair step).
#[must_use]
pub fn interrupted_tool_result(tool_call_id: impl Into<String>) -> LogEntry {
    LogEntry::ToolResult {
        tool_call_id: tool_call_id.into(),
        content: INTERRUPTED_TURN_NOTICE.to_owned(),
        is_error: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otus_llm::{MessageContent, MessageRole, ToolCall};

    fn tool_call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_owned(),
            name: "wait".to_owned(),
            arguments: serde_json::json!({}),
        }
    }

    #[test]
    fn dropping_a_group_never_splits_it() {
        // Log = [user("a"), assistant([t1,t2]), tool_result(t1), tool_result(t2), user("b")]
        let log = vec![
            LogEntry::User {
                text: "a".to_owned(),
            },
            LogEntry::Assistant {
                text: None,
                tool_calls: vec![tool_call("t1"), tool_call("t2")],
            },
            LogEntry::ToolResult {
                tool_call_id: "t1".to_owned(),
                content: "ok".to_owned(),
                is_error: false,
            },
            LogEntry::ToolResult {
                tool_call_id: "t2".to_owned(),
                content: "ok".to_owned(),
                is_error: false,
            },
            LogEntry::User {
                text: "b".to_owned(),
            },
        ];
        let budgets = ContextBudgets {
            max_recent_messages: 3,
            ..ContextBudgets::default()
        };

        let result = build_context("sys", None, None, &log, &budgets);

        // system prompt + user("b") only: the 3-entry tool group doesn't
        // fit within a 3-message budget alongside it, so it's dropped whole
        // rather than split.
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].role, MessageRole::System);
        assert_eq!(result[1].text(), Some("b"));
    }

    #[test]
    fn zero_recent_messages_with_summary_still_yields_a_synthetic_user_turn() {
        let result = build_context("sys", Some("prior summary"), None, &[], &ContextBudgets::default());

        assert_eq!(result[0].role, MessageRole::System);
        assert_eq!(result[1].text(), Some("prior summary"));
        assert_eq!(result.last().unwrap().role, MessageRole::User);
    }

    #[test]
    fn oversized_tool_result_is_ellipsized_exactly_once() {
        let huge = "x".repeat(10_000);
        let log = vec![LogEntry::ToolResult {
            tool_call_id: "t1".to_owned(),
            content: huge,
            is_error: false,
        }];
        let budgets = ContextBudgets {
            max_tool_result_chars: 100,
            ..ContextBudgets::default()
        };

        let result = build_context("sys", None, None, &log, &budgets);
        let tool_msg = result
            .iter()
            .find(|m| matches!(m.content, MessageContent::ToolResult(_)))
            .unwrap();
        let MessageContent::ToolResult(r) = &tool_msg.content else {
            unreachable!()
        };
        assert_eq!(r.content.matches("[truncated").count(), 1);
        assert!(r.content.len() < 10_000);
    }

    #[test]
    fn lone_oversized_group_is_kept_anyway() {
        let huge = "x".repeat(50_000);
        let log = vec![LogEntry::User { text: huge }];
        let budgets = ContextBudgets {
            max_recent_chars: 10,
            max_total_chars: 10,
            ..ContextBudgets::default()
        };

        let result = build_context("sys", None, None, &log, &budgets);
        assert!(result.iter().any(|m| m.role == MessageRole::User));
    }

    #[test]
    fn assistant_turn_with_no_tool_calls_is_a_singleton_group() {
        let log = vec![
            LogEntry::User {
                text: "hi".to_owned(),
            },
            LogEntry::Assistant {
                text: Some("hello".to_owned()),
                tool_calls: vec![],
            },
        ];
        let groups = group_log(&log);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn orphan_tool_result_is_its_own_group() {
        let log = vec![LogEntry::ToolResult {
            tool_call_id: "dangling".to_owned(),
            content: "late".to_owned(),
            is_error: false,
        }];
        let groups = group_log(&log);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 1);
    }
}
