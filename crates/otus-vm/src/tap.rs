//! Fixed-cardinality TAP device pool (§4.4).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{VmError, VmResult};

/// A single pre-named network device bridged to the host bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapDevice {
    /// Device name, e.g. `tap3`.
    pub name: String,
    /// Index within the pool (used to derive the MAC deterministically).
    pub index: u32,
    /// Locally-administered unicast MAC address.
    pub mac: String,
    /// Guest IP address assigned to this device.
    pub guest_ip: String,
    /// Whether the device is currently allocated to a VM.
    #[serde(default)]
    pub in_use: bool,
}

/// On-disk configuration for the TAP pool, loaded from a well-known file
/// when present (§4.4 "loads configuration from a well-known file").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapPoolConfig {
    /// Name of the host bridge every TAP device attaches to.
    pub bridge_name: String,
    /// Base guest IP octet prefix, e.g. `"192.168.200"`.
    pub ip_prefix: String,
    /// Number of devices in the pool.
    pub capacity: u32,
    /// Device name prefix, e.g. `"tap"`.
    pub device_prefix: String,
}

impl Default for TapPoolConfig {
    fn default() -> Self {
        Self {
            bridge_name: "otus-br0".to_string(),
            ip_prefix: "192.168.200".to_string(),
            capacity: 8,
            device_prefix: "tap".to_string(),
        }
    }
}

impl TapPoolConfig {
    /// Load from `path`, falling back to [`TapPoolConfig::default`] if the
    /// file does not exist.
    ///
    /// # Errors
    /// Returns [`VmError::InvalidConfig`] if the file exists but cannot be
    /// parsed.
    pub fn load_or_default(path: &Path) -> VmResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                toml::from_str(&contents).map_err(|e| VmError::InvalidConfig(e.to_string()))
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(VmError::Io(e)),
        }
    }
}

/// Derive a locally-administered unicast MAC from a device index.
///
/// The second-least-significant bit of the first octet is cleared
/// (unicast) and the least-significant bit of the first octet is set
/// (locally administered) — the usual convention for synthetic device
/// identity.
#[must_use]
pub fn derive_mac(index: u32) -> String {
    let bytes = index.to_be_bytes();
    format!(
        "02:00:00:{:02x}:{:02x}:{:02x}",
        bytes[1], bytes[2], bytes[3]
    )
}

/// Fixed-cardinality pool of TAP devices.
pub struct TapPool {
    config: TapPoolConfig,
    devices: Vec<TapDevice>,
}

impl TapPool {
    /// Build a pool of `config.capacity` devices, all initially free.
    #[must_use]
    pub fn new(config: TapPoolConfig) -> Self {
        let devices = (0..config.capacity)
            .map(|index| TapDevice {
                name: format!("{}{}", config.device_prefix, index),
                index,
                mac: derive_mac(index),
                // Safety: index < capacity (u32), guest IP host octet wraps
                // at 255 which is far above any realistic pool capacity.
                #[allow(clippy::arithmetic_side_effects)]
                guest_ip: format!("{}.{}", config.ip_prefix, index + 2),
                in_use: false,
            })
            .collect();
        Self { config, devices }
    }

    /// Return the first free device, marking it in-use, or fail with
    /// [`VmError::NoTapCapacity`].
    ///
    /// # Errors
    /// Returns [`VmError::NoTapCapacity`] if every device is allocated.
    pub fn allocate(&mut self) -> VmResult<TapDevice> {
        let device = self
            .devices
            .iter_mut()
            .find(|d| !d.in_use)
            .ok_or(VmError::NoTapCapacity)?;
        device.in_use = true;
        debug!(device = %device.name, "allocated tap device");
        Ok(device.clone())
    }

    /// Mark `name` free again. A no-op if the name is unknown (defensive
    /// against double-release, since `VM::destroy` is idempotent).
    pub fn release(&mut self, name: &str) {
        if let Some(device) = self.devices.iter_mut().find(|d| d.name == name) {
            device.in_use = false;
            debug!(device = %name, "released tap device");
        }
    }

    /// Number of devices currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.devices.iter().filter(|d| !d.in_use).count()
    }

    /// Check that the bridge and first TAP device exist at the OS level.
    ///
    /// This is a best-effort remediation check: on a real host it would
    /// shell out to `ip link show <bridge>`; failure yields a
    /// human-readable string but is not necessarily fatal if networking is
    /// disabled for this daemon instance (§4.4).
    #[must_use]
    pub fn verify(&self) -> Result<(), String> {
        let bridge_path = PathBuf::from("/sys/class/net").join(&self.config.bridge_name);
        if !bridge_path.exists() {
            let msg = format!(
                "bridge {} not found; create it with `ip link add {} type bridge` \
                 or disable networking in the daemon config",
                self.config.bridge_name, self.config.bridge_name
            );
            warn!(%msg, "tap pool verify failed");
            return Err(msg);
        }

        let first_device = format!("{}0", self.config.device_prefix);
        let tap_path = PathBuf::from("/sys/class/net").join(&first_device);
        if !tap_path.exists() {
            let msg = format!(
                "tap device {first_device} not found; create it with `ip tuntap add {first_device} \
                 mode tap` and attach it to {} or disable networking in the daemon config",
                self.config.bridge_name
            );
            warn!(%msg, "tap pool verify failed");
            return Err(msg);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_returns_first_free_device() {
        let mut pool = TapPool::new(TapPoolConfig {
            capacity: 2,
            ..TapPoolConfig::default()
        });
        let first = pool.allocate().unwrap();
        assert_eq!(first.name, "tap0");
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn allocate_fails_with_no_capacity() {
        let mut pool = TapPool::new(TapPoolConfig {
            capacity: 1,
            ..TapPoolConfig::default()
        });
        pool.allocate().unwrap();
        assert!(matches!(pool.allocate(), Err(VmError::NoTapCapacity)));
    }

    #[test]
    fn release_frees_device_for_reuse() {
        let mut pool = TapPool::new(TapPoolConfig {
            capacity: 1,
            ..TapPoolConfig::default()
        });
        let device = pool.allocate().unwrap();
        pool.release(&device.name);
        assert_eq!(pool.available(), 1);
        assert!(pool.allocate().is_ok());
    }

    #[test]
    fn mac_derivation_is_deterministic() {
        assert_eq!(derive_mac(3), derive_mac(3));
        assert_ne!(derive_mac(3), derive_mac(4));
    }

    #[test]
    fn config_falls_back_to_default_when_file_missing() {
        let config = TapPoolConfig::load_or_default(std::path::Path::new("/nonexistent/tap.toml"))
            .unwrap();
        assert_eq!(config.capacity, TapPoolConfig::default().capacity);
    }
}
