//! VM lifecycle error taxonomy.

use thiserror::Error;

/// Errors raised while booting, health-checking, or destroying a microVM.
#[derive(Debug, Error)]
pub enum VmError {
    /// The TAP pool has no free device (§4.4 "no capacity").
    #[error("no capacity: all TAP devices are in use")]
    NoTapCapacity,

    /// The hypervisor process could not be started.
    #[error("failed to start hypervisor: {0}")]
    SpawnFailed(String),

    /// The in-guest agent never became healthy within the allowed attempts.
    #[error("VM did not become healthy after {attempts} attempts")]
    HealthCheckFailed {
        /// Number of poll attempts made.
        attempts: u32,
    },

    /// Underlying RPC failure while polling health or during destroy.
    #[error("rpc error: {0}")]
    Rpc(#[from] otus_rpc::RpcError),

    /// Filesystem failure (control socket path, config file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("invalid TAP pool configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience alias.
pub type VmResult<T> = Result<T, VmError>;
