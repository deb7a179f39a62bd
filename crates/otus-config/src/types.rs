//! Process-wide configuration shape (§6 "Process-wide state").
//!
//! Every field here is self-contained and serializable so it can round-trip
//! through `~/.otus/config.toml`; there is no dependency on any other
//! internal `otus` crate.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Resolved daemon configuration, after the full precedence chain has been
/// applied (defaults → user file → environment → in-memory `/init`
/// overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket the daemon listens on.
    pub socket_path: PathBuf,
    /// PID file written on startup and removed on clean shutdown.
    pub pid_path: PathBuf,
    /// Upper bound on inference-loop iterations per turn before
    /// `max_iterations_reached` is emitted.
    pub max_iterations: u32,
    /// Per-request timeout, in seconds, for calls to the remote model API.
    pub api_timeout_secs: u64,
    /// Number of nearest-neighbour snippets `search_code` requests from the
    /// semantic store.
    pub rag_top_k: u32,
    /// Model identifier sent to the remote chat-completions endpoint.
    /// Overridable per-workspace via `POST /init`.
    pub model: String,
    /// Target number of warm VMs the pre-warmer pool maintains.
    pub pool_target_size: usize,
    /// Default number of lines `read_terminal` requests from the guest when
    /// the caller doesn't specify one.
    pub terminal_default_lines: u32,
    /// Path to the microVM kernel image (§4.3; the image itself is an
    /// external collaborator, but the daemon still needs a path to hand
    /// the hypervisor).
    pub kernel_image: PathBuf,
    /// Path to the microVM root filesystem image.
    pub root_fs: PathBuf,
    /// Directory for per-VM control sockets.
    pub control_socket_dir: PathBuf,
    /// Guest port the in-guest agent's RPC server listens on.
    pub guest_rpc_port: u16,
    /// Per-RPC timeout, in seconds, for calls to the in-guest agent.
    pub rpc_timeout_secs: u64,
    /// Whether to allocate TAP networking for booted sandboxes (§4.4). When
    /// `false`, sandboxes are reached over the vsock-proxy transport
    /// instead and no TAP device is allocated.
    pub networking_enabled: bool,
    /// Path to the TAP pool's on-disk configuration file (§4.4 "loads
    /// configuration from a well-known file when present").
    pub tap_config_path: PathBuf,
    /// Path to the hypervisor binary the daemon spawns one child process
    /// of per VM (§4.3; the binary itself is an external collaborator).
    pub hypervisor_binary: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let home = directories::UserDirs::new().map(|u| u.home_dir().to_path_buf());
        let otus_dir = home
            .as_deref()
            .unwrap_or(std::path::Path::new("."))
            .join(".otus");
        Self {
            socket_path: otus_dir.join("daemon.sock"),
            pid_path: otus_dir.join("daemon.pid"),
            max_iterations: 25,
            api_timeout_secs: 120,
            rag_top_k: 8,
            model: "gpt-4o-mini".to_owned(),
            pool_target_size: 2,
            terminal_default_lines: 200,
            kernel_image: otus_dir.join("vm/kernel.bin"),
            root_fs: otus_dir.join("vm/rootfs.ext4"),
            control_socket_dir: otus_dir.join("vm/sockets"),
            guest_rpc_port: 50_051,
            rpc_timeout_secs: 30,
            networking_enabled: false,
            tap_config_path: otus_dir.join("tap.toml"),
            hypervisor_binary: PathBuf::from("firecracker"),
        }
    }
}

/// In-memory overrides supplied on `POST /init` (§4.11). These apply on top
/// of the file/environment layers but are never written back to
/// `~/.otus/config.toml` — they are workspace-scoped and live only for the
/// lifetime of the daemon process.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitOverrides {
    /// Override the configured model for this workspace.
    pub model: Option<String>,
    /// Override `max_iterations` for this workspace.
    #[serde(rename = "maxIterations")]
    pub max_iterations: Option<u32>,
}

impl DaemonConfig {
    /// Apply `/init` overrides on top of the currently resolved config.
    pub fn apply_overrides(&mut self, overrides: &InitOverrides) {
        if let Some(model) = &overrides.model {
            self.model = model.clone();
        }
        if let Some(max_iterations) = overrides.max_iterations {
            self.max_iterations = max_iterations;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = DaemonConfig::default();
        assert_eq!(config.max_iterations, 25);
        assert_eq!(config.api_timeout_secs, 120);
        assert_eq!(config.rag_top_k, 8);
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.pool_target_size, 2);
        assert_eq!(config.terminal_default_lines, 200);
        assert!(config.socket_path.ends_with(".otus/daemon.sock"));
        assert!(config.pid_path.ends_with(".otus/daemon.pid"));
    }

    #[test]
    fn init_overrides_apply_only_set_fields() {
        let mut config = DaemonConfig::default();
        config.apply_overrides(&InitOverrides {
            model: Some("gpt-4o".to_owned()),
            max_iterations: None,
        });
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.max_iterations, 25);
    }
}
