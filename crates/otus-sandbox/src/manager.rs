//! Named-handle sandbox manager: pool-first allocation, active-sandbox
//! selection, stop-with-syncback (§4.6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use otus_core::SandboxId;
use otus_ignore::IgnorePatterns;
use otus_vm::{Hypervisor, TapPool, Vm, VmPool};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::error::{SandboxError, SandboxResult};

/// Static configuration needed to boot a sandbox inline when the pool has
/// nothing available (§4.6 "otherwise boots a fresh one inline").
pub struct SandboxBootParams {
    /// Directory for per-VM control sockets.
    pub control_socket_dir: PathBuf,
    /// Kernel image path.
    pub kernel_image: PathBuf,
    /// Root filesystem image path.
    pub root_fs: PathBuf,
    /// Guest port the in-guest agent's RPC server listens on.
    pub guest_rpc_port: u16,
    /// Per-RPC timeout.
    pub rpc_timeout: Duration,
}

/// One sandbox: a named handle over a booted VM (§3 "Sandbox").
pub struct Sandbox {
    /// Opaque identifier, generated at allocation.
    pub id: SandboxId,
    /// Optional human name.
    pub name: Option<String>,
    /// Owning VM handle (guest RPC client lives on `vm.rpc`).
    pub vm: Vm,
    /// Whether the workspace has been synced into this sandbox at least
    /// once.
    pub workspace_synced: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Reported shape for `list_sandboxes` (§4.6).
#[derive(Debug, Clone)]
pub struct SandboxInfo {
    /// Sandbox id.
    pub id: SandboxId,
    /// Optional human name.
    pub name: Option<String>,
    /// Seconds since creation.
    pub uptime_secs: i64,
    /// Guest IP, if networking is enabled.
    pub guest_ip: Option<String>,
    /// Whether the workspace has been synced.
    pub workspace_synced: bool,
}

/// Per-session (or per-workspace) collection of sandboxes, keyed by id.
///
/// Map mutations (insert/remove/active-change) are serialised by a single
/// `tokio::sync::Mutex` so concurrent callers see a linearizable view
/// (§4.6, §5 "Sandbox-manager map mutations are linearizable").
pub struct SandboxManager {
    sandboxes: Mutex<HashMap<SandboxId, Sandbox>>,
    active: Mutex<Option<SandboxId>>,
    /// Guards against two syncs into the same workspace running at once
    /// (§5 "Shared resources").
    sync_lock: Mutex<()>,
    hypervisor: Arc<dyn Hypervisor>,
    tap_pool: Option<Arc<Mutex<TapPool>>>,
    pool: Option<Arc<VmPool>>,
    boot_params: SandboxBootParams,
}

impl SandboxManager {
    /// Build a manager. `pool` is consulted first on `start_sandbox`;
    /// `hypervisor`/`boot_params` are used to boot inline on a pool miss.
    #[must_use]
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        tap_pool: Option<Arc<Mutex<TapPool>>>,
        pool: Option<Arc<VmPool>>,
        boot_params: SandboxBootParams,
    ) -> Self {
        Self {
            sandboxes: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
            sync_lock: Mutex::new(()),
            hypervisor,
            tap_pool,
            pool,
            boot_params,
        }
    }

    /// Obtain a sandbox: prefer a pre-warmed pool VM, otherwise boot one
    /// inline. Optionally push the workspace (default caller behaviour,
    /// §4.9 `start_sandbox`). The first sandbox created becomes active.
    ///
    /// # Errors
    /// Returns [`SandboxError::Vm`] if booting fails.
    #[instrument(skip(self, workspace_root, patterns))]
    pub async fn start_sandbox(
        &self,
        name: Option<String>,
        push_workspace: bool,
        workspace_root: Option<&Path>,
        patterns: Option<&IgnorePatterns>,
    ) -> SandboxResult<SandboxId> {
        let vm = if let Some(pool) = &self.pool {
            match pool.get().await {
                Some(vm) => vm,
                None => self.boot_inline().await?,
            }
        } else {
            self.boot_inline().await?
        };

        let id = SandboxId::new();
        let mut sandbox = Sandbox {
            id: id.clone(),
            name,
            vm,
            workspace_synced: false,
            created_at: Utc::now(),
        };

        if push_workspace {
            if let (Some(root), Some(patterns)) = (workspace_root, patterns) {
                let _guard = self.sync_lock.lock().await;
                let compiled = patterns.compile()?;
                otus_sync::sync_to_sandbox(&sandbox.vm.rpc, root, &compiled).await?;
                sandbox.workspace_synced = true;
            }
        }

        let mut sandboxes = self.sandboxes.lock().await;
        sandboxes.insert(id.clone(), sandbox);
        drop(sandboxes);

        let mut active = self.active.lock().await;
        if active.is_none() {
            *active = Some(id.clone());
        }

        info!(sandbox_id = %id, "sandbox started");
        Ok(id)
    }

    async fn boot_inline(&self) -> SandboxResult<Vm> {
        let vm = Vm::boot(
            self.hypervisor.as_ref(),
            self.tap_pool.as_ref(),
            &self.boot_params.control_socket_dir,
            &self.boot_params.kernel_image,
            &self.boot_params.root_fs,
            self.boot_params.guest_rpc_port,
            self.boot_params.rpc_timeout,
        )
        .await?;
        Ok(vm)
    }

    /// Change the active sandbox.
    ///
    /// # Errors
    /// Returns [`SandboxError::NotFound`] if `id` isn't known.
    pub async fn set_active(&self, id: &SandboxId) -> SandboxResult<()> {
        let sandboxes = self.sandboxes.lock().await;
        if !sandboxes.contains_key(id) {
            return Err(SandboxError::NotFound(id.to_string()));
        }
        drop(sandboxes);
        *self.active.lock().await = Some(id.clone());
        Ok(())
    }

    /// The currently active sandbox id, if any.
    pub async fn active_id(&self) -> Option<SandboxId> {
        self.active.lock().await.clone()
    }

    /// Resolve `id`, falling back to the active sandbox when `None`.
    ///
    /// # Errors
    /// Returns [`SandboxError::NoActiveSandbox`] if `id` is `None` and no
    /// sandbox is active.
    pub async fn resolve(&self, id: Option<&SandboxId>) -> SandboxResult<SandboxId> {
        match id {
            Some(id) => Ok(id.clone()),
            None => self
                .active
                .lock()
                .await
                .clone()
                .ok_or(SandboxError::NoActiveSandbox),
        }
    }

    /// Stop a sandbox, optionally syncing the workspace back first
    /// (default `true`, §4.9 `stop_sandbox`). Idempotent: a second call on
    /// the same id fails cleanly with [`SandboxError::NotFound`] rather
    /// than panicking (§8 round-trip property).
    ///
    /// If the stopped sandbox was active, the next remaining sandbox (in
    /// insertion-arbitrary map order) becomes active, or none if the map
    /// is now empty (§4.6).
    ///
    /// # Errors
    /// Returns [`SandboxError::NotFound`] if `id` is unknown, or a sync/VM
    /// error if `sync_back` is requested and fails.
    #[instrument(skip(self, workspace_root, patterns))]
    pub async fn stop_sandbox(
        &self,
        id: &SandboxId,
        sync_back: bool,
        workspace_root: Option<&Path>,
        patterns: Option<&IgnorePatterns>,
    ) -> SandboxResult<()> {
        let mut sandboxes = self.sandboxes.lock().await;
        let mut sandbox = sandboxes
            .remove(id)
            .ok_or_else(|| SandboxError::NotFound(id.to_string()))?;
        drop(sandboxes);

        if sync_back {
            if let (Some(root), Some(patterns)) = (workspace_root, patterns) {
                let _guard = self.sync_lock.lock().await;
                otus_sync::sync_from_sandbox(&sandbox.vm.rpc, root, patterns).await?;
            }
        }

        sandbox.vm.destroy(self.tap_pool.as_ref()).await?;

        let mut active = self.active.lock().await;
        if active.as_ref() == Some(id) {
            let sandboxes = self.sandboxes.lock().await;
            *active = sandboxes.keys().next().cloned();
        }

        info!(sandbox_id = %id, "sandbox stopped");
        Ok(())
    }

    /// List every sandbox currently held (§4.9 `list_sandboxes`).
    pub async fn list_sandboxes(&self) -> Vec<SandboxInfo> {
        let sandboxes = self.sandboxes.lock().await;
        let now = Utc::now();
        sandboxes
            .values()
            .map(|s| SandboxInfo {
                id: s.id.clone(),
                name: s.name.clone(),
                uptime_secs: (now - s.created_at).num_seconds(),
                guest_ip: s.vm.guest_ip.clone(),
                workspace_synced: s.workspace_synced,
            })
            .collect()
    }

    /// Run `f` with a reference to the resolved sandbox's guest RPC client.
    ///
    /// # Errors
    /// Returns [`SandboxError::NotFound`] if `id` is unknown.
    pub async fn with_rpc<T>(
        &self,
        id: &SandboxId,
        f: impl FnOnce(&otus_rpc::RpcClient) -> T,
    ) -> SandboxResult<T> {
        let sandboxes = self.sandboxes.lock().await;
        let sandbox = sandboxes
            .get(id)
            .ok_or_else(|| SandboxError::NotFound(id.to_string()))?;
        Ok(f(&sandbox.vm.rpc))
    }

    /// Number of sandboxes currently held, for diagnostics/tests.
    pub async fn count(&self) -> usize {
        self.sandboxes.lock().await.len()
    }

    /// Stop every sandbox, syncing back where possible, for daemon
    /// shutdown (§5 "Daemon shutdown").
    pub async fn shutdown_all(&self, workspace_root: Option<&Path>, patterns: Option<&IgnorePatterns>) {
        let ids: Vec<SandboxId> = self.sandboxes.lock().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.stop_sandbox(&id, true, workspace_root, patterns).await {
                warn!(sandbox_id = %id, error = %e, "error stopping sandbox during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otus_vm::ProcessHypervisor;
    use tempfile::TempDir;

    // `Vm::boot` drives a real hypervisor process and a real guest health
    // handshake; the fakes for that live in otus-vm's own test suite
    // (`HypervisorHandle::from_child` is crate-private there). Here we
    // only exercise manager bookkeeping that doesn't require a live VM.
    fn empty_manager() -> SandboxManager {
        let dir = TempDir::new().unwrap();
        SandboxManager::new(
            Arc::new(ProcessHypervisor::new(PathBuf::from("/nonexistent"))),
            None,
            None,
            SandboxBootParams {
                control_socket_dir: dir.keep(),
                kernel_image: PathBuf::from("/nonexistent"),
                root_fs: PathBuf::from("/nonexistent"),
                guest_rpc_port: 19999,
                rpc_timeout: Duration::from_millis(100),
            },
        )
    }

    #[tokio::test]
    async fn resolve_with_no_sandboxes_fails() {
        let manager = empty_manager();
        assert!(matches!(
            manager.resolve(None).await,
            Err(SandboxError::NoActiveSandbox)
        ));
    }

    #[tokio::test]
    async fn set_active_on_unknown_id_fails() {
        let manager = empty_manager();
        assert!(matches!(
            manager.set_active(&SandboxId::new()).await,
            Err(SandboxError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stop_unknown_sandbox_fails() {
        let manager = empty_manager();
        assert!(matches!(
            manager.stop_sandbox(&SandboxId::new(), false, None, None).await,
            Err(SandboxError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_sandboxes_starts_empty() {
        let manager = empty_manager();
        assert!(manager.list_sandboxes().await.is_empty());
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn start_sandbox_with_no_pool_and_unreachable_hypervisor_fails() {
        let manager = empty_manager();
        assert!(manager.start_sandbox(None, false, None, None).await.is_err());
        assert_eq!(manager.count().await, 0);
    }
}
