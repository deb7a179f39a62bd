//! Hypervisor process abstraction.
//!
//! The microVM hypervisor itself, its kernel image, and its root
//! filesystem are external collaborators (out of scope per the purpose
//! statement); this module only defines the boundary the VM lifecycle
//! needs to drive one.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::error::{VmError, VmResult};
use crate::tap::TapDevice;

/// Everything needed to configure and start one microVM.
#[derive(Debug, Clone)]
pub struct VmBootConfig {
    /// Path to the kernel image.
    pub kernel_image: PathBuf,
    /// Path to the root filesystem image.
    pub root_fs: PathBuf,
    /// Unique control socket path for this VM instance.
    pub control_socket: PathBuf,
    /// Vsock CID chosen for this VM.
    pub vsock_cid: u32,
    /// TAP device to attach, if networking is enabled.
    pub tap: Option<TapDevice>,
}

/// A running hypervisor process.
pub struct HypervisorHandle {
    child: Child,
}

impl HypervisorHandle {
    /// Wrap an already-spawned child process. Exposed crate-wide so test
    /// doubles can build a handle without going through a real
    /// [`Hypervisor`] implementation.
    #[must_use]
    pub(crate) fn from_child(child: Child) -> Self {
        Self { child }
    }

    /// Terminate the hypervisor process. Idempotent: killing an already
    /// dead process is treated as success.
    pub async fn terminate(&mut self) -> VmResult<()> {
        if self.child.id().is_none() {
            return Ok(());
        }
        match self.child.kill().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(VmError::Io(e)),
        }
    }
}

/// Abstraction over "start a hypervisor process with this configuration".
/// The real implementation shells out to the configured hypervisor
/// binary; tests substitute a fake that spawns nothing.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Start a VM with the given boot configuration.
    async fn start(&self, config: &VmBootConfig) -> VmResult<HypervisorHandle>;
}

/// Default hypervisor: spawns a configured external binary (e.g.
/// `firecracker`) as a child process via `tokio::process::Command`.
pub struct ProcessHypervisor {
    binary_path: PathBuf,
}

impl ProcessHypervisor {
    /// Build a hypervisor driver that launches `binary_path` for each VM.
    #[must_use]
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }
}

#[async_trait]
impl Hypervisor for ProcessHypervisor {
    async fn start(&self, config: &VmBootConfig) -> VmResult<HypervisorHandle> {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("--kernel").arg(&config.kernel_image);
        cmd.arg("--rootfs").arg(&config.root_fs);
        cmd.arg("--api-sock").arg(&config.control_socket);
        cmd.arg("--vsock-cid").arg(config.vsock_cid.to_string());
        if let Some(tap) = &config.tap {
            cmd.arg("--tap-device").arg(&tap.name);
            cmd.arg("--guest-mac").arg(&tap.mac);
        }
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::null());
        cmd.stderr(std::process::Stdio::null());

        let child = cmd
            .spawn()
            .map_err(|e| VmError::SpawnFailed(e.to_string()))?;

        Ok(HypervisorHandle { child })
    }
}
