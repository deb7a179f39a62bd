//! Background pre-warmer of booted VMs (§4.5).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::hypervisor::Hypervisor;
use crate::lifecycle::Vm;
use crate::tap::TapPool;

/// Backoff applied between failed warm-up attempts.
const WARMUP_BACKOFF: Duration = Duration::from_secs(2);

/// Static configuration the pool needs to boot a fresh VM.
pub struct PoolBootParams {
    /// Target number of warm VMs to maintain.
    pub target_size: usize,
    /// Directory for per-VM control sockets.
    pub control_socket_dir: PathBuf,
    /// Kernel image path.
    pub kernel_image: PathBuf,
    /// Root filesystem image path.
    pub root_fs: PathBuf,
    /// Guest port the in-guest agent's RPC server listens on.
    pub guest_rpc_port: u16,
    /// Per-RPC timeout used while health-checking newly booted VMs.
    pub rpc_timeout: Duration,
}

/// Holds a target number T of fully-booted, health-checked VMs in an
/// available list, refilling asynchronously as they're handed out.
pub struct VmPool {
    available: Mutex<Vec<Vm>>,
    hypervisor: Arc<dyn Hypervisor>,
    tap_pool: Option<Arc<Mutex<TapPool>>>,
    params: PoolBootParams,
}

impl VmPool {
    /// Build an empty pool; call [`VmPool::warm_up`] (typically spawned as
    /// a background task) to populate it toward `target_size`.
    #[must_use]
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        tap_pool: Option<Arc<Mutex<TapPool>>>,
        params: PoolBootParams,
    ) -> Self {
        Self {
            available: Mutex::new(Vec::new()),
            hypervisor,
            tap_pool,
            params,
        }
    }

    /// Number of VMs currently available without booting a new one.
    pub async fn available_count(&self) -> usize {
        self.available.lock().await.len()
    }

    /// Configured target size.
    #[must_use]
    pub fn target_size(&self) -> usize {
        self.params.target_size
    }

    /// Pop one available VM (pool-owned: `workspace_synced = false`, no
    /// name — the caller assigns those). Returns `None` if the pool is
    /// momentarily empty; the caller should fall back to booting inline.
    /// Does not itself trigger a refill — call [`VmPool::warm_up`]
    /// separately (typically as a long-lived background task) to keep the
    /// pool topped up.
    pub async fn get(&self) -> Option<Vm> {
        self.available.lock().await.pop()
    }

    /// Create one VM at a time until the available list reaches
    /// `target_size`, backing off on failure. Intended to run as a
    /// long-lived background task for the lifetime of the daemon.
    pub async fn warm_up(&self) {
        loop {
            let current = self.available.lock().await.len();
            if current >= self.params.target_size {
                tokio::time::sleep(WARMUP_BACKOFF).await;
                continue;
            }

            match Vm::boot(
                self.hypervisor.as_ref(),
                self.tap_pool.as_ref(),
                &self.params.control_socket_dir,
                &self.params.kernel_image,
                &self.params.root_fs,
                self.params.guest_rpc_port,
                self.params.rpc_timeout,
            )
            .await
            {
                Ok(vm) => {
                    let mut available = self.available.lock().await;
                    available.push(vm);
                    debug!(available = available.len(), target = self.params.target_size, "pool warmed one vm");
                },
                Err(e) => {
                    warn!(error = %e, "pool warm-up failed, backing off");
                    tokio::time::sleep(WARMUP_BACKOFF).await;
                },
            }
        }
    }

    /// Destroy every VM currently held by the pool (daemon shutdown).
    pub async fn shutdown(&self) {
        let mut available = self.available.lock().await;
        info!(count = available.len(), "shutting down vm pool");
        for mut vm in available.drain(..) {
            if let Err(e) = vm.destroy(self.tap_pool.as_ref()).await {
                warn!(error = %e, "error destroying pooled vm during shutdown");
            }
        }
    }
}
