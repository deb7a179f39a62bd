//! Graceful shutdown sequencing, shared between `POST /shutdown` and
//! `ctrl_c` (§5 "Daemon shutdown cancels all sessions, stops all
//! sandboxes ..., drains the VM pool, removes the socket file and PID
//! file").

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::state::AppState;

/// Cancel every session, stop every sandbox (with sync-back where
/// possible), and drain the VM pool. Does not remove the socket/PID
/// files or exit the process — the caller decides that part since
/// `ctrl_c` and `/shutdown` differ in what happens after.
pub async fn drain(state: &AppState) {
    for path in state.workspace_paths().await {
        if let Err(e) = state.shutdown_workspace(&path).await {
            warn!(workspace = %path.display(), error = %e, "error shutting down workspace");
        }
    }
    state.vm_pool.shutdown().await;
}

/// Remove the socket and PID files, best-effort.
pub fn remove_runtime_files(socket_path: &Path, pid_path: &Path) {
    if let Err(e) = std::fs::remove_file(socket_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %socket_path.display(), error = %e, "failed to remove socket file");
        }
    }
    if let Err(e) = std::fs::remove_file(pid_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %pid_path.display(), error = %e, "failed to remove pid file");
        }
    }
}

/// Drive the full shutdown sequence and exit the process. Spawned rather
/// than awaited directly from the `/shutdown` handler so the `204`
/// response has a chance to flush before the process exits.
pub fn spawn_shutdown(state: Arc<AppState>) {
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        info!("shutdown requested, draining");
        drain(&state).await;
        remove_runtime_files(&state.config.socket_path, &state.config.pid_path);
        info!("shutdown complete, exiting");
        std::process::exit(0);
    });
}
