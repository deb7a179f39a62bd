//! Process-wide daemon state: one shared VM pool and a map of
//! per-workspace collaborators (§4.11 "Session manager & daemon server",
//! §6 "Process-wide state").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use otus_config::DaemonConfig;
use otus_core::SessionId;
use otus_ignore::IgnorePatterns;
use otus_llm::{LlmProvider, OpenAiCompatProvider, ProviderConfig};
use otus_runtime::SessionManager;
use otus_sandbox::{SandboxBootParams, SandboxManager, TerminalMultiplexer};
use otus_tools::ToolRegistry;
use otus_vm::{Hypervisor, ProcessHypervisor, TapPool, VmPool};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::DaemonError;

/// Everything one initialised workspace needs to open sessions and run
/// tools against its own sandboxes (§4.11 `POST /init`).
pub struct WorkspaceState {
    /// Canonical workspace root on the host.
    pub root: PathBuf,
    /// Sandbox manager scoped to this workspace.
    pub sandbox_manager: Arc<SandboxManager>,
    /// Terminal multiplexer scoped to this workspace.
    pub terminal_mux: Arc<TerminalMultiplexer>,
    /// Ignore patterns read from `.otusignore` at init time.
    pub ignore_patterns: IgnorePatterns,
    /// Session manager driving every open session for this workspace.
    pub session_manager: Arc<SessionManager>,
    /// Effective model id for sessions opened here.
    pub max_iterations: u32,
}

/// Top-level daemon state shared across every HTTP handler.
///
/// The hypervisor driver, TAP pool, and VM pre-warmer are process-wide
/// singletons (§6): one daemon instance serves every workspace, and pooled
/// VMs are handed out to whichever workspace calls `start_sandbox` next.
pub struct AppState {
    /// Resolved configuration at daemon startup (defaults → user file →
    /// env; `/init` overrides are applied per-workspace on top).
    pub config: DaemonConfig,
    /// Process-wide VM pre-warmer, drained on shutdown.
    pub vm_pool: Arc<VmPool>,
    /// Process-wide TAP pool, `None` when networking is disabled.
    pub tap_pool: Option<Arc<Mutex<TapPool>>>,
    /// Hypervisor driver shared by every sandbox manager.
    pub hypervisor: Arc<dyn Hypervisor>,
    /// Workspaces that have been `POST /init`-ed, keyed by canonical path.
    workspaces: Mutex<HashMap<PathBuf, Arc<WorkspaceState>>>,
    /// Routing index from an open session id back to its workspace.
    sessions: Mutex<HashMap<SessionId, PathBuf>>,
}

impl AppState {
    /// Build process-wide state and start the VM pool warm-up task.
    #[must_use]
    pub fn new(config: DaemonConfig) -> Self {
        let hypervisor: Arc<dyn Hypervisor> =
            Arc::new(ProcessHypervisor::new(config.hypervisor_binary.clone()));

        let tap_pool = if config.networking_enabled {
            let tap_config = otus_vm::TapPoolConfig::load_or_default(&config.tap_config_path)
                .unwrap_or_else(|e| {
                    warn!(error = %e, path = %config.tap_config_path.display(), "invalid tap config, using defaults");
                    otus_vm::TapPoolConfig::default()
                });
            Some(Arc::new(Mutex::new(TapPool::new(tap_config))))
        } else {
            None
        };

        let vm_pool = Arc::new(VmPool::new(
            Arc::clone(&hypervisor),
            tap_pool.clone(),
            otus_vm::PoolBootParams {
                target_size: config.pool_target_size,
                control_socket_dir: config.control_socket_dir.clone(),
                kernel_image: config.kernel_image.clone(),
                root_fs: config.root_fs.clone(),
                guest_rpc_port: config.guest_rpc_port,
                rpc_timeout: Duration::from_secs(config.rpc_timeout_secs),
            },
        ));

        Self {
            config,
            vm_pool,
            tap_pool,
            hypervisor,
            workspaces: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn the VM pool's long-lived warm-up loop as a background task.
    pub fn spawn_pool_warmup(self: &Arc<Self>) {
        let pool = Arc::clone(&self.vm_pool);
        tokio::spawn(async move { pool.warm_up().await });
    }

    fn boot_params(&self) -> SandboxBootParams {
        SandboxBootParams {
            control_socket_dir: self.config.control_socket_dir.clone(),
            kernel_image: self.config.kernel_image.clone(),
            root_fs: self.config.root_fs.clone(),
            guest_rpc_port: self.config.guest_rpc_port,
            rpc_timeout: Duration::from_secs(self.config.rpc_timeout_secs),
        }
    }

    /// Initialise (or re-initialise) a workspace with its own sandbox
    /// manager, terminal multiplexer, ignore patterns, and session
    /// manager (§4.11 `POST /init`).
    ///
    /// # Errors
    /// Returns [`DaemonError::WorkspacePathMissing`] if `workspace_path`
    /// does not exist on the host, or [`DaemonError::Runtime`] if building
    /// the LLM provider fails.
    pub async fn init_workspace(
        &self,
        workspace_path: &Path,
        api_key: Option<String>,
        model: Option<String>,
        max_iterations: Option<u32>,
    ) -> Result<(), DaemonError> {
        let root = std::fs::canonicalize(workspace_path)
            .map_err(|_| DaemonError::WorkspacePathMissing(workspace_path.display().to_string()))?;

        let overrides = otus_config::InitOverrides { model, max_iterations };
        let mut workspace_config = self.config.clone();
        workspace_config.apply_overrides(&overrides);

        let provider = OpenAiCompatProvider::new(ProviderConfig {
            base_url: "https://openrouter.ai/api/v1/chat/completions".to_owned(),
            api_key,
            model: workspace_config.model.clone(),
            max_tokens: 4096,
            timeout: Duration::from_secs(workspace_config.api_timeout_secs),
        })?;
        let llm: Arc<dyn LlmProvider> = Arc::new(provider);

        let ignore_path = root.join(otus_ignore::IGNORE_FILE_NAME);
        let ignore_patterns = std::fs::read_to_string(&ignore_path)
            .map(|contents| IgnorePatterns::parse(&contents))
            .unwrap_or_else(|_| IgnorePatterns::empty());

        let sandbox_manager = Arc::new(SandboxManager::new(
            Arc::clone(&self.hypervisor),
            self.tap_pool.clone(),
            Some(Arc::clone(&self.vm_pool)),
            self.boot_params(),
        ));
        let terminal_mux = Arc::new(TerminalMultiplexer::new());
        let session_manager = Arc::new(SessionManager::new(
            llm,
            Arc::new(ToolRegistry::with_defaults()),
            otus_context::ContextBudgets::default(),
        ));

        let state = Arc::new(WorkspaceState {
            root: root.clone(),
            sandbox_manager,
            terminal_mux,
            ignore_patterns,
            session_manager,
            max_iterations: workspace_config.max_iterations,
        });

        self.workspaces.lock().await.insert(root.clone(), state);
        info!(workspace = %root.display(), "workspace initialised");
        Ok(())
    }

    /// Look up an initialised workspace by its (possibly non-canonical)
    /// path.
    ///
    /// # Errors
    /// Returns [`DaemonError::WorkspaceNotInitialised`] if `path` hasn't
    /// been `POST /init`-ed.
    pub async fn workspace(&self, path: &Path) -> Result<Arc<WorkspaceState>, DaemonError> {
        let root = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.workspaces
            .lock()
            .await
            .get(&root)
            .cloned()
            .ok_or_else(|| DaemonError::WorkspaceNotInitialised(path.display().to_string()))
    }

    /// Open a new session against an initialised workspace and record the
    /// session→workspace routing entry (§4.11 `POST /sessions`).
    ///
    /// # Errors
    /// Returns [`DaemonError::WorkspaceNotInitialised`] if `path` hasn't
    /// been `POST /init`-ed.
    pub async fn open_session(
        &self,
        path: &Path,
        max_iterations_override: Option<u32>,
    ) -> Result<(SessionId, String), DaemonError> {
        let workspace = self.workspace(path).await?;
        let max_iterations = max_iterations_override.unwrap_or(workspace.max_iterations);
        let id = workspace
            .session_manager
            .open(
                workspace.root.clone(),
                Arc::clone(&workspace.sandbox_manager),
                Arc::clone(&workspace.terminal_mux),
                workspace.ignore_patterns.clone(),
                max_iterations,
            )
            .await;
        self.sessions.lock().await.insert(id, workspace.root.clone());
        Ok((id, self.config.model.clone()))
    }

    /// Find the workspace a session belongs to.
    ///
    /// # Errors
    /// Returns [`DaemonError::SessionNotFound`] if `id` isn't open.
    pub async fn workspace_for_session(&self, id: SessionId) -> Result<Arc<WorkspaceState>, DaemonError> {
        let path = self
            .sessions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DaemonError::SessionNotFound(id.to_string()))?;
        self.workspaces
            .lock()
            .await
            .get(&path)
            .cloned()
            .ok_or_else(|| DaemonError::SessionNotFound(id.to_string()))
    }

    /// Close a session and drop its routing entry.
    ///
    /// # Errors
    /// Returns [`DaemonError::SessionNotFound`] if `id` isn't open.
    pub async fn close_session(&self, id: SessionId) -> Result<(), DaemonError> {
        let workspace = self.workspace_for_session(id).await?;
        workspace.session_manager.close(id).await?;
        self.sessions.lock().await.remove(&id);
        Ok(())
    }

    /// Tear down one workspace: close every open session, stop every
    /// sandbox with sync-back, and drop it from the map (§4.11 `POST
    /// /workspaces/:path/shutdown`).
    ///
    /// # Errors
    /// Returns [`DaemonError::WorkspaceNotInitialised`] if `path` hasn't
    /// been `POST /init`-ed.
    pub async fn shutdown_workspace(&self, path: &Path) -> Result<(), DaemonError> {
        let root = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let workspace = self
            .workspaces
            .lock()
            .await
            .remove(&root)
            .ok_or_else(|| DaemonError::WorkspaceNotInitialised(path.display().to_string()))?;

        for id in workspace.session_manager.list().await {
            let _ = workspace.session_manager.close(id).await;
            self.sessions.lock().await.remove(&id);
        }
        workspace
            .sandbox_manager
            .shutdown_all(Some(&workspace.root), Some(&workspace.ignore_patterns))
            .await;
        info!(workspace = %workspace.root.display(), "workspace shut down");
        Ok(())
    }

    /// Every currently initialised workspace path, for full-daemon
    /// shutdown.
    pub async fn workspace_paths(&self) -> Vec<PathBuf> {
        self.workspaces.lock().await.keys().cloned().collect()
    }

    /// Current VM pool occupancy for `GET /health`.
    pub async fn pool_status(&self) -> (usize, usize) {
        (self.vm_pool.available_count().await, self.vm_pool.target_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // `init_workspace` never actually boots a VM or calls the remote model
    // endpoint, so pointing the hypervisor/model endpoint at unreachable
    // targets is fine for every test below.
    fn test_state() -> AppState {
        let mut config = DaemonConfig::default();
        config.networking_enabled = false;
        config.hypervisor_binary = PathBuf::from("/nonexistent");
        config.kernel_image = PathBuf::from("/nonexistent");
        config.root_fs = PathBuf::from("/nonexistent");
        config.pool_target_size = 0;
        AppState::new(config)
    }

    #[tokio::test]
    async fn workspace_lookup_fails_before_init() {
        let state = test_state();
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            state.workspace(dir.path()).await,
            Err(DaemonError::WorkspaceNotInitialised(_))
        ));
    }

    #[tokio::test]
    async fn init_rejects_missing_path() {
        let state = test_state();
        let missing = PathBuf::from("/nonexistent/workspace/path");
        assert!(matches!(
            state.init_workspace(&missing, None, None, None).await,
            Err(DaemonError::WorkspacePathMissing(_))
        ));
    }

    #[tokio::test]
    async fn init_then_open_session_then_close() {
        let state = test_state();
        let dir = TempDir::new().unwrap();

        state
            .init_workspace(dir.path(), Some("key".to_owned()), None, None)
            .await
            .unwrap();

        let (id, _model) = state.open_session(dir.path(), None).await.unwrap();
        assert!(state.workspace_for_session(id).await.is_ok());

        state.close_session(id).await.unwrap();
        assert!(matches!(
            state.workspace_for_session(id).await,
            Err(DaemonError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn open_session_fails_for_uninitialised_workspace() {
        let state = test_state();
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            state.open_session(dir.path(), None).await,
            Err(DaemonError::WorkspaceNotInitialised(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_workspace_closes_sessions_and_forgets_workspace() {
        let state = test_state();
        let dir = TempDir::new().unwrap();
        state.init_workspace(dir.path(), None, None, None).await.unwrap();
        let (id, _) = state.open_session(dir.path(), None).await.unwrap();

        state.shutdown_workspace(dir.path()).await.unwrap();

        assert!(matches!(
            state.workspace_for_session(id).await,
            Err(DaemonError::SessionNotFound(_))
        ));
        assert!(matches!(
            state.workspace(dir.path()).await,
            Err(DaemonError::WorkspaceNotInitialised(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_unknown_workspace_fails() {
        let state = test_state();
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            state.shutdown_workspace(dir.path()).await,
            Err(DaemonError::WorkspaceNotInitialised(_))
        ));
    }

    #[tokio::test]
    async fn init_overrides_max_iterations_for_new_sessions() {
        let state = test_state();
        let dir = TempDir::new().unwrap();
        state
            .init_workspace(dir.path(), None, None, Some(2))
            .await
            .unwrap();
        let workspace = state.workspace(dir.path()).await.unwrap();
        assert_eq!(workspace.max_iterations, 2);
    }
}
