//! Session plan: an ordered list of free-text steps with a cursor (§3
//! "Session", §4.9 `plan` tool).

use serde::{Deserialize, Serialize};

/// A session's current plan. Replaced wholesale by the `plan` tool;
/// advanced one step at a time as work completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Ordered free-text step descriptions.
    pub steps: Vec<String>,
    /// Index of the next not-yet-completed step.
    pub current_step: usize,
}

impl Plan {
    /// Replace the plan with a fresh step list, cursor reset to zero
    /// (§4.9 `plan`: "Replace session plan; cursor=0").
    #[must_use]
    pub fn new(steps: Vec<String>) -> Self {
        Self {
            steps,
            current_step: 0,
        }
    }

    /// Whether every step has been completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.current_step >= self.steps.len()
    }

    /// The text of the step currently in progress, if any remain.
    #[must_use]
    pub fn current_step_text(&self) -> Option<&str> {
        self.steps.get(self.current_step).map(String::as_str)
    }

    /// Advance the cursor past the current step. Returns the completed
    /// step's index and the next step's text, or `None` if the plan was
    /// already complete.
    pub fn advance(&mut self) -> Option<(usize, Option<&str>)> {
        if self.is_complete() {
            return None;
        }
        let completed = self.current_step;
        self.current_step = self.current_step.saturating_add(1);
        Some((completed, self.steps.get(self.current_step).map(String::as_str)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_plan_starts_at_step_zero() {
        let plan = Plan::new(vec!["a".into(), "b".into()]);
        assert_eq!(plan.current_step, 0);
        assert_eq!(plan.current_step_text(), Some("a"));
        assert!(!plan.is_complete());
    }

    #[test]
    fn advance_moves_cursor_and_reports_next_step() {
        let mut plan = Plan::new(vec!["a".into(), "b".into()]);
        let (completed, next) = plan.advance().unwrap();
        assert_eq!(completed, 0);
        assert_eq!(next, Some("b"));
        assert!(!plan.is_complete());

        let (completed, next) = plan.advance().unwrap();
        assert_eq!(completed, 1);
        assert_eq!(next, None);
        assert!(plan.is_complete());
    }

    #[test]
    fn advance_past_completion_returns_none() {
        let mut plan = Plan::new(vec!["a".into()]);
        plan.advance();
        assert!(plan.advance().is_none());
    }

    #[test]
    fn empty_plan_is_immediately_complete() {
        let plan = Plan::new(vec![]);
        assert!(plan.is_complete());
        assert_eq!(plan.current_step_text(), None);
    }
}
