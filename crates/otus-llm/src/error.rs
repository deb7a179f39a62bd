//! Remote model API error taxonomy (§7 "Model error").

use thiserror::Error;

/// Errors surfaced by the remote chat-completions client.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No API key configured for a non-local endpoint.
    #[error("API key not configured for endpoint {base_url}")]
    ApiKeyNotConfigured {
        /// Base URL the request was headed to.
        base_url: String,
    },

    /// The HTTP request itself failed (DNS, connect, TLS, or timed out).
    #[error("request to remote model API failed: {0}")]
    RequestFailed(String),

    /// The endpoint responded with a non-2xx status.
    #[error("remote model API returned HTTP {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The response body did not match the expected chat-completions shape
    /// (missing choices, malformed tool-call arguments, etc).
    #[error("invalid response from remote model API: {0}")]
    InvalidResponse(String),
}

/// Convenience alias.
pub type LlmResult<T> = Result<T, LlmError>;
