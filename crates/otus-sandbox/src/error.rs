//! Sandbox and terminal error taxonomy (§7 "Sandbox state").

use thiserror::Error;

/// Errors raised by the sandbox manager or terminal multiplexer.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// No sandbox id was given and none is active.
    #[error("no active sandbox")]
    NoActiveSandbox,

    /// The given sandbox id is not known.
    #[error("sandbox not found: {0}")]
    NotFound(String),

    /// VM boot or destroy failed.
    #[error("vm error: {0}")]
    Vm(#[from] otus_vm::VmError),

    /// Guest RPC failed.
    #[error("rpc error: {0}")]
    Rpc(#[from] otus_rpc::RpcError),

    /// Workspace sync failed.
    #[error("sync error: {0}")]
    Sync(#[from] otus_sync::SyncError),

    /// Ignore pattern compilation failed.
    #[error("ignore pattern error: {0}")]
    Ignore(#[from] otus_ignore::IgnoreError),

    /// A sync into the same workspace is already in flight.
    #[error("a sync is already in progress for this workspace")]
    SyncInProgress,
}

/// Convenience alias.
pub type SandboxResult<T> = Result<T, SandboxError>;
