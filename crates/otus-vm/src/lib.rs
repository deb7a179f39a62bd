//! MicroVM lifecycle, TAP networking pool, and background pre-warmer
//! (§4.3 VM lifecycle, §4.4 TAP pool, §4.5 VM pool).

mod error;
mod hypervisor;
mod lifecycle;
mod pool;
mod tap;

pub use error::{VmError, VmResult};
pub use hypervisor::{Hypervisor, HypervisorHandle, ProcessHypervisor, VmBootConfig};
pub use lifecycle::{
    Vm, BOOT_GRACE_PERIOD, HEALTH_CHECK_ATTEMPTS, HEALTH_CHECK_BACKOFF,
};
pub use pool::{PoolBootParams, VmPool};
pub use tap::{derive_mac, TapDevice, TapPool, TapPoolConfig};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A hypervisor double that spawns nothing; the test supplies a real
    /// TCP listener standing in for the in-guest agent's health endpoint.
    struct NoopHypervisor;

    #[async_trait]
    impl Hypervisor for NoopHypervisor {
        async fn start(&self, _config: &VmBootConfig) -> VmResult<HypervisorHandle> {
            let child = tokio::process::Command::new("true")
                .stdout(std::process::Stdio::null())
                .spawn()
                .map_err(|e| VmError::SpawnFailed(e.to_string()))?;
            Ok(HypervisorHandle::from_child(child))
        }
    }

    async fn fake_guest_health_server(port: u16) {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    loop {
                        let n = match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        let line = String::from_utf8_lossy(&buf[..n]);
                        if let Some(first_line) = line.lines().next() {
                            if let Ok(req) = serde_json::from_str::<serde_json::Value>(first_line) {
                                let id = req.get("id").cloned().unwrap_or(json!(0));
                                let response =
                                    json!({"jsonrpc":"2.0","id":id,"result":{"status":"ok","uptime":1}});
                                let mut out = serde_json::to_string(&response).unwrap();
                                out.push('\n');
                                let _ = socket.write_all(out.as_bytes()).await;
                            }
                        }
                    }
                });
            }
        });
    }

    #[tokio::test]
    async fn boot_over_tcp_succeeds_once_guest_is_healthy() {
        let port = 19321;
        fake_guest_health_server(port).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let dir = TempDir::new().unwrap();
        let mut vm = Vm::boot(
            &NoopHypervisor,
            None,
            dir.path(),
            &dir.path().join("kernel"),
            &dir.path().join("rootfs"),
            port,
            std::time::Duration::from_secs(2),
        )
        .await
        .unwrap();

        assert!(vm.guest_ip.is_none());
        vm.destroy(None).await.unwrap();
        // destroy is idempotent
        vm.destroy(None).await.unwrap();
    }

    #[tokio::test]
    async fn pool_available_count_starts_empty() {
        let nonexistent = std::path::PathBuf::from("/nonexistent");
        let params = PoolBootParams {
            target_size: 2,
            control_socket_dir: std::env::temp_dir(),
            kernel_image: nonexistent.clone(),
            root_fs: nonexistent,
            guest_rpc_port: 19999,
            rpc_timeout: std::time::Duration::from_secs(1),
        };
        let pool = VmPool::new(Arc::new(NoopHypervisor), None, params);
        assert_eq!(pool.available_count().await, 0);
        assert!(pool.get().await.is_none());
    }
}
