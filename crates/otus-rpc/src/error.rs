//! Transport-level error taxonomy (§7 "Transport", "Timeout", "Protocol").

use thiserror::Error;

/// Errors surfaced by the RPC transport.
#[derive(Debug, Error, Clone)]
pub enum RpcError {
    /// The connection (or handshake) could not be established or failed
    /// mid-stream. Treated as a transport-class error (§7).
    #[error("transport error: {0}")]
    Transport(String),

    /// The request exceeded its configured timeout before a response
    /// arrived; always reports the elapsed budget.
    #[error("request timed out after {elapsed_ms}ms")]
    Timeout {
        /// Elapsed time budget, in milliseconds.
        elapsed_ms: u64,
    },

    /// A protocol violation: malformed JSON, a response with no matching
    /// pending request (duplicate/unknown id), or a malformed vsock-proxy
    /// handshake. Treated as transport-class; no repair beyond the
    /// interrupted-turn rule is attempted (§7).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transport was closed (explicitly, or by I/O failure) while
    /// requests were still pending; all pending calls fail with this.
    #[error("transport closed: {0}")]
    Closed(String),

    /// The guest returned a JSON-RPC error object.
    #[error("remote error {code}: {message}")]
    Remote {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },
}

/// Convenience alias.
pub type RpcResult<T> = Result<T, RpcError>;
