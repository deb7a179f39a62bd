//! VM lifecycle: boot/destroy, socket allocation, health polling (§4.3).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use otus_rpc::RpcClient;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{VmError, VmResult};
use crate::hypervisor::{Hypervisor, HypervisorHandle, VmBootConfig};
use crate::tap::{TapDevice, TapPool};

/// Number of health-check attempts before boot is declared failed.
pub const HEALTH_CHECK_ATTEMPTS: u32 = 10;
/// Fixed backoff between health-check attempts.
pub const HEALTH_CHECK_BACKOFF: Duration = Duration::from_millis(500);
/// Grace period after starting the hypervisor before the first health
/// check is attempted.
pub const BOOT_GRACE_PERIOD: Duration = Duration::from_secs(1);

static NEXT_CID: AtomicU32 = AtomicU32::new(3);

fn allocate_vsock_cid() -> u32 {
    NEXT_CID.fetch_add(1, Ordering::Relaxed)
}

/// Where to reach the in-guest agent once the VM is up.
#[derive(Debug, Clone)]
pub enum GuestEndpoint {
    /// Host Unix socket proxying to a guest vsock port.
    VsockProxy {
        /// Path to the proxy's listening socket.
        proxy_socket: PathBuf,
        /// Guest-side vsock port the agent listens on.
        guest_port: u32,
    },
    /// Plain TCP to a guest IP/port (networking enabled).
    Tcp {
        /// Guest IP address.
        ip: std::net::IpAddr,
        /// Guest port.
        port: u16,
    },
}

/// A booted microVM: its control sockets, optional TAP allocation, and
/// connected RPC client.
pub struct Vm {
    /// Control socket path(s) unique to this VM.
    pub control_socket: PathBuf,
    /// TAP device allocated to this VM, if networking is enabled.
    pub tap: Option<TapDevice>,
    /// Guest IP, if networking is enabled.
    pub guest_ip: Option<String>,
    /// Connected RPC client to the in-guest agent.
    pub rpc: RpcClient,
    hypervisor: HypervisorHandle,
}

impl Vm {
    /// Boot sequence (§4.3): allocate sockets, optionally allocate a TAP
    /// device, configure and start the hypervisor, wait the grace period,
    /// then poll `health` up to [`HEALTH_CHECK_ATTEMPTS`] with a fixed
    /// backoff. On any failure the VM is destroyed unconditionally and
    /// its TAP/socket allocations are released.
    ///
    /// # Errors
    /// Returns [`VmError::NoTapCapacity`], [`VmError::SpawnFailed`], or
    /// [`VmError::HealthCheckFailed`].
    #[instrument(skip(hypervisor, tap_pool, control_socket_dir))]
    pub async fn boot(
        hypervisor: &dyn Hypervisor,
        tap_pool: Option<&Arc<tokio::sync::Mutex<TapPool>>>,
        control_socket_dir: &Path,
        kernel_image: &Path,
        root_fs: &Path,
        guest_rpc_port: u16,
        rpc_timeout: Duration,
    ) -> VmResult<Self> {
        let control_socket = control_socket_dir.join(format!("{}.sock", Uuid::new_v4()));
        let vsock_cid = allocate_vsock_cid();

        let tap = if let Some(pool) = tap_pool {
            Some(pool.lock().await.allocate()?)
        } else {
            None
        };

        let guest_ip = tap.as_ref().map(|t| t.guest_ip.clone());

        let boot_config = VmBootConfig {
            kernel_image: kernel_image.to_path_buf(),
            root_fs: root_fs.to_path_buf(),
            control_socket: control_socket.clone(),
            vsock_cid,
            tap: tap.clone(),
        };

        let boot_result = Self::boot_inner(
            hypervisor,
            &boot_config,
            &control_socket,
            guest_ip.clone(),
            guest_rpc_port,
            rpc_timeout,
        )
        .await;

        match boot_result {
            Ok(vm) => Ok(vm),
            Err(e) => {
                warn!(error = %e, "vm boot failed, cleaning up");
                if let (Some(pool), Some(tap)) = (tap_pool, &tap) {
                    pool.lock().await.release(&tap.name);
                }
                let _ = std::fs::remove_file(&control_socket);
                Err(e)
            },
        }
    }

    async fn boot_inner(
        hypervisor: &dyn Hypervisor,
        boot_config: &VmBootConfig,
        control_socket: &Path,
        guest_ip: Option<String>,
        guest_rpc_port: u16,
        rpc_timeout: Duration,
    ) -> VmResult<Self> {
        let hypervisor_handle = hypervisor.start(boot_config).await?;

        tokio::time::sleep(BOOT_GRACE_PERIOD).await;

        let rpc = connect_and_wait_healthy(
            control_socket,
            guest_ip.as_deref(),
            guest_rpc_port,
            rpc_timeout,
        )
        .await?;

        info!(socket = %control_socket.display(), "vm ready");

        Ok(Self {
            control_socket: control_socket.to_path_buf(),
            tap: boot_config.tap.clone(),
            guest_ip,
            rpc,
            hypervisor: hypervisor_handle,
        })
    }

    /// Idempotent destroy: closing an already-destroyed VM is a no-op
    /// success rather than an error (§4.3, §8 round-trip property).
    ///
    /// # Errors
    /// Returns [`VmError::Io`] if the control socket cannot be removed.
    pub async fn destroy(&mut self, tap_pool: Option<&Arc<tokio::sync::Mutex<TapPool>>>) -> VmResult<()> {
        self.hypervisor.terminate().await?;

        if let (Some(pool), Some(tap)) = (tap_pool, &self.tap) {
            pool.lock().await.release(&tap.name);
        }

        match std::fs::remove_file(&self.control_socket) {
            Ok(()) | Err(_) => {},
        }

        Ok(())
    }
}

async fn connect_and_wait_healthy(
    control_socket: &Path,
    guest_ip: Option<&str>,
    guest_rpc_port: u16,
    rpc_timeout: Duration,
) -> VmResult<RpcClient> {
    // Networking-enabled VMs are reached over TCP once their guest IP is
    // known; vsock-less test doubles use a proxy over the control socket.
    let stream = if let Some(ip) = guest_ip {
        let addr: std::net::IpAddr = ip
            .parse()
            .map_err(|_| VmError::InvalidConfig(format!("invalid guest ip {ip}")))?;
        otus_rpc::connect_tcp(addr, guest_rpc_port).await?
    } else {
        otus_rpc::connect_vsock_proxy(control_socket, u32::from(guest_rpc_port)).await?
    };

    let rpc = RpcClient::new(stream, rpc_timeout);

    let mut attempt = 0;
    loop {
        attempt += 1;
        match rpc.call("health", None).await {
            Ok(_) => return Ok(rpc),
            Err(e) if attempt >= HEALTH_CHECK_ATTEMPTS => {
                warn!(error = %e, attempts = attempt, "vm health check exhausted");
                return Err(VmError::HealthCheckFailed { attempts: attempt });
            },
            Err(_) => {
                tokio::time::sleep(HEALTH_CHECK_BACKOFF).await;
            },
        }
    }
}
