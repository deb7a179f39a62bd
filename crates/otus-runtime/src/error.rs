//! Runtime error taxonomy (§7 "Model error", "Fatal daemon error" is one
//! layer up in `otus-daemon`).

use thiserror::Error;

/// Errors raised by session and inference-engine operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No session exists with the given id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A session with this id is already open.
    #[error("session already exists: {0}")]
    SessionExists(String),

    /// The remote model call failed. Per §7 this ends the turn with
    /// `error` then `complete{summary="Error: ..."}`; it never propagates
    /// through the `TurnEvent` stream as an `Err`.
    #[error("model error: {0}")]
    Llm(#[from] otus_llm::LlmError),
}

/// Convenience alias.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
