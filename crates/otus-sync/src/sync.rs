//! Push/pull orchestration over the guest RPC transport (§4.2, §6).

use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use otus_ignore::{CompiledPatterns, IGNORE_FILE_NAME};
use otus_rpc::RpcClient;
use serde_json::json;
use tracing::{info, instrument};

use crate::archive::{build_push_tar, extract_pull_tar, prune_not_in_snapshot};
use crate::error::{SyncError, SyncResult};

/// All sync RPCs use a long timeout — tar construction/transfer over a
/// large workspace can legitimately take minutes (§4.2).
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(300);

/// Outcome of a push (`to_sandbox`).
#[derive(Debug, Clone, Copy)]
pub struct PushReport {
    /// Number of files written into the guest workspace.
    pub files_written: usize,
}

/// Outcome of a pull (`from_sandbox`).
#[derive(Debug, Clone, Copy)]
pub struct PullReport {
    /// Number of paths present in the pulled snapshot.
    pub paths_synced: usize,
}

/// Build a tar of `workspace_root` and push it into the guest's
/// `/workspace` over `rpc` (§4.2 "Push (to_sandbox)").
///
/// # Errors
/// Returns [`SyncError`] if the local tar cannot be built or the guest
/// RPC fails.
#[instrument(skip(rpc, patterns))]
pub async fn sync_to_sandbox(
    rpc: &RpcClient,
    workspace_root: &Path,
    patterns: &CompiledPatterns,
) -> SyncResult<PushReport> {
    let built = build_push_tar(workspace_root, patterns, IGNORE_FILE_NAME)?;
    let tar_data_b64 = BASE64.encode(&built.data);

    rpc.call_with_timeout(
        "sync_to_guest",
        Some(json!({ "tarData": tar_data_b64, "basePath": "/workspace" })),
        SYNC_TIMEOUT,
    )
    .await?;

    info!(files = built.files_written, "pushed workspace to sandbox");
    Ok(PushReport {
        files_written: built.files_written,
    })
}

/// Pull the guest's `/workspace` back over the host workspace root, then
/// reconcile the host tree to mirror the guest snapshot exactly for the
/// synced subset (§4.2 "Pull (from_sandbox)", §8 invariant 5).
///
/// # Errors
/// Returns [`SyncError`] if the guest RPC fails, the returned tar is
/// malformed, or extraction fails. On any failure between extraction and
/// pruning, the prune phase is skipped entirely so host data is never
/// lost from a partial sync.
#[instrument(skip(rpc, patterns))]
pub async fn sync_from_sandbox(
    rpc: &RpcClient,
    workspace_root: &Path,
    patterns: &otus_ignore::IgnorePatterns,
) -> SyncResult<PullReport> {
    let compiled = patterns.compile()?;
    let excludes = patterns.patterns().to_vec();

    let response = rpc
        .call_with_timeout(
            "sync_from_guest",
            Some(json!({ "basePath": "/workspace", "excludes": excludes })),
            SYNC_TIMEOUT,
        )
        .await?;

    let tar_data_b64 = response
        .get("tarData")
        .and_then(|v| v.as_str())
        .ok_or_else(|| SyncError::Protocol("missing tarData in sync_from_guest response".into()))?;
    let tar_bytes = BASE64
        .decode(tar_data_b64)
        .map_err(|e| SyncError::MalformedTar(e.to_string()))?;

    // Extraction never deletes; a failure here simply propagates without
    // ever reaching the prune phase below.
    let snapshot = extract_pull_tar(&tar_bytes, workspace_root)?;

    prune_not_in_snapshot(workspace_root, &snapshot, &compiled, IGNORE_FILE_NAME)?;

    info!(paths = snapshot.len(), "pulled workspace from sandbox");
    Ok(PullReport {
        paths_synced: snapshot.len(),
    })
}
