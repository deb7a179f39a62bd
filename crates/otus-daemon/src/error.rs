//! HTTP-layer error taxonomy (§7 "Fatal daemon error" is handled in
//! `shutdown`; everything here is a per-request failure translated into
//! the `{error: string}` JSON shape the CLI expects).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

/// Errors a daemon HTTP handler can return.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The named workspace has not been `POST /init`-ed.
    #[error("workspace not initialised: {0}")]
    WorkspaceNotInitialised(String),

    /// The workspace path does not exist on the host filesystem.
    #[error("workspace path does not exist: {0}")]
    WorkspacePathMissing(String),

    /// No session is open with the given id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Runtime-layer session/engine failure.
    #[error("runtime error: {0}")]
    Runtime(#[from] otus_runtime::RuntimeError),

    /// Configuration failed to load or parse.
    #[error("config error: {0}")]
    Config(#[from] otus_config::ConfigError),

    /// Building the remote model client failed (e.g. invalid TLS config).
    #[error("model provider error: {0}")]
    Llm(#[from] otus_llm::LlmError),

    /// Malformed request body that otherwise deserialised (e.g. an
    /// unparseable workspace path).
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::WorkspaceNotInitialised(_)
            | Self::WorkspacePathMissing(_)
            | Self::SessionNotFound(_)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Runtime(otus_runtime::RuntimeError::SessionNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Runtime(_) | Self::Config(_) | Self::Llm(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
