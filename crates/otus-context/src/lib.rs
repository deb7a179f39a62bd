//! Context builder: projects a session's durable message log into the
//! bounded message sequence sent to the model each inference iteration
//! (§4.8).

mod builder;
mod types;

pub use builder::{build_context, interrupted_tool_result};
pub use types::{ContextBudgets, LogEntry};
