//! HTTP + SSE API over the daemon's Unix socket (§4.11).
//!
//! One `create_router` builds a `Router<AppState>` with CORS layered on
//! top; the `/sessions/:id/messages` handler adapts an
//! `mpsc::Receiver<TurnEvent>` into an SSE stream, with one internal
//! `stream_end` sentinel appended before the response closes (§4.11).

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::{http, Router};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::instrument;

use otus_core::SessionId;

use crate::error::DaemonError;
use crate::state::AppState;

/// Build the full route table (§4.11 endpoint list).
///
/// Bound only over the Unix socket (file-system ACLs are the access
/// control), but CORS is still layered in case a browser-based CLI
/// front-end connects through a local proxy.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/prerequisites", post(prerequisites_handler))
        .route("/init", post(init_handler))
        .route("/sessions", post(create_session_handler))
        .route("/sessions/{id}/messages", post(send_message_handler))
        .route("/sessions/{id}", delete(delete_session_handler))
        .route("/workspaces/shutdown", post(shutdown_workspace_handler))
        .route("/shutdown", post(shutdown_daemon_handler))
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct VmPoolStatus {
    available: usize,
    target: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(rename = "vmPool", skip_serializing_if = "Option::is_none")]
    vm_pool: Option<VmPoolStatus>,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (available, target) = state.pool_status().await;
    Json(HealthResponse {
        status: "ok",
        vm_pool: Some(VmPoolStatus { available, target }),
    })
}

#[derive(Debug, Deserialize)]
struct PrerequisitesRequest {
    #[serde(rename = "workspacePath")]
    workspace_path: PathBuf,
}

#[derive(Debug, Serialize)]
struct PrerequisitesResponse {
    ok: bool,
    issues: Vec<String>,
}

#[instrument(skip(state))]
async fn prerequisites_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PrerequisitesRequest>,
) -> Json<PrerequisitesResponse> {
    let mut issues = Vec::new();

    if !req.workspace_path.exists() {
        issues.push(format!(
            "workspace path does not exist: {}",
            req.workspace_path.display()
        ));
    }
    if !state.config.kernel_image.exists() {
        issues.push(format!("kernel image not found: {}", state.config.kernel_image.display()));
    }
    if !state.config.root_fs.exists() {
        issues.push(format!("root filesystem image not found: {}", state.config.root_fs.display()));
    }
    if let Some(tap_pool) = &state.tap_pool {
        if let Err(msg) = tap_pool.lock().await.verify() {
            issues.push(msg);
        }
    }

    Json(PrerequisitesResponse {
        ok: issues.is_empty(),
        issues,
    })
}

#[derive(Debug, Deserialize)]
struct InitRequest {
    #[serde(rename = "workspacePath")]
    workspace_path: PathBuf,
    #[serde(rename = "openrouterApiKey")]
    openrouter_api_key: Option<String>,
    #[allow(dead_code)]
    #[serde(rename = "voyageApiKey", default)]
    voyage_api_key: Option<String>,
    #[serde(default)]
    verbose: bool,
    model: Option<String>,
    #[serde(rename = "maxIterations")]
    max_iterations: Option<u32>,
}

#[instrument(skip(state, req), fields(workspace = %req.workspace_path.display()))]
async fn init_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitRequest>,
) -> Result<http::StatusCode, DaemonError> {
    if req.verbose {
        tracing::debug!(workspace = %req.workspace_path.display(), "init requested with verbose logging");
    }
    state
        .init_workspace(
            &req.workspace_path,
            req.openrouter_api_key,
            req.model,
            req.max_iterations,
        )
        .await?;
    Ok(http::StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    #[serde(rename = "workspacePath")]
    workspace_path: PathBuf,
    #[serde(rename = "maxIterations")]
    max_iterations: Option<u32>,
}

#[derive(Debug, Serialize)]
struct CreateSessionResponse {
    #[serde(rename = "sessionId")]
    session_id: String,
    model: String,
}

#[instrument(skip(state))]
async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, DaemonError> {
    let (id, model) = state
        .open_session(&req.workspace_path, req.max_iterations)
        .await?;
    Ok(Json(CreateSessionResponse {
        session_id: id.to_string(),
        model,
    }))
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    message: String,
}

/// Sentinel appended after the event channel drains, so the CLI can tell
/// the stream ended even if the transport swallows the final flush
/// (§4.11 "the server emits one internal `stream_end` sentinel").
fn stream_end_event() -> Event {
    Event::default().data(json!({ "type": "stream_end" }).to_string())
}

#[instrument(skip(state))]
async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, DaemonError> {
    let session_id =
        SessionId::parse(&id).map_err(|e| DaemonError::BadRequest(format!("invalid session id: {e}")))?;
    let workspace = state.workspace_for_session(session_id).await?;
    let events = workspace
        .session_manager
        .chat(session_id, req.message)
        .await?;

    let events = tokio_stream::wrappers::ReceiverStream::new(events)
        .map(|event| Ok(Event::default().data(serde_json::to_string(&event).unwrap_or_default())));
    let stream = events.chain(stream::once(async { Ok(stream_end_event()) }));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[instrument(skip(state))]
async fn delete_session_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<http::StatusCode, DaemonError> {
    let session_id =
        SessionId::parse(&id).map_err(|e| DaemonError::BadRequest(format!("invalid session id: {e}")))?;
    state.close_session(session_id).await?;
    Ok(http::StatusCode::NO_CONTENT)
}

/// Body-carried workspace path rather than a path-segment parameter:
/// workspace roots contain `/`, and axum's wildcard segments must be the
/// final segment of a route, so `:path/shutdown` as written in the
/// endpoint table can't be expressed as a literal path matcher.
#[derive(Debug, Deserialize)]
struct ShutdownWorkspaceRequest {
    #[serde(rename = "workspacePath")]
    workspace_path: PathBuf,
}

#[instrument(skip(state))]
async fn shutdown_workspace_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ShutdownWorkspaceRequest>,
) -> Result<http::StatusCode, DaemonError> {
    state.shutdown_workspace(&req.workspace_path).await?;
    Ok(http::StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
async fn shutdown_daemon_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    crate::shutdown::spawn_shutdown(state);
    http::StatusCode::NO_CONTENT
}
