//! Synchroniser error taxonomy (§4.2 "Failure modes").

use thiserror::Error;

/// Errors raised while pushing or pulling the workspace.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local filesystem I/O failure (walking, reading, writing).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The received or produced tar stream was malformed. A malformed tar
    /// fails the whole sync (§4.2); the prune phase is never reached.
    #[error("malformed tar archive: {0}")]
    MalformedTar(String),

    /// An ignore pattern failed to compile.
    #[error("ignore pattern error: {0}")]
    Pattern(#[from] otus_ignore::IgnoreError),

    /// The guest RPC call failed.
    #[error("transport error: {0}")]
    Rpc(#[from] otus_rpc::RpcError),

    /// The guest's response did not contain the expected field.
    #[error("unexpected guest response: {0}")]
    Protocol(String),
}

/// Convenience alias.
pub type SyncResult<T> = Result<T, SyncError>;
