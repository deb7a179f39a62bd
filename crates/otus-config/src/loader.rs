//! Layered configuration loading.
//!
//! Precedence, narrowest to widest: built-in defaults → `~/.otus/config.toml`
//! → `OTUS_`-prefixed environment variables → in-memory `/init` overrides
//! (applied by the caller via [`DaemonConfig::apply_overrides`], not here).
//! Two file tiers plus environment, since this daemon has no system-wide
//! `/etc` install story.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::DaemonConfig;

/// Load daemon configuration with the full precedence chain.
///
/// `home_override` substitutes for the platform home directory when
/// resolving `~/.otus/config.toml` (used by tests; production callers pass
/// `None`).
///
/// # Errors
/// Returns [`ConfigError::Parse`] if the user config file exists but is not
/// valid TOML, [`ConfigError::Io`] if it exists but can't be read, or
/// [`ConfigError::InvalidEnvValue`] if an `OTUS_`-prefixed environment
/// variable holds an unparseable value.
pub fn load(home_override: Option<&Path>) -> ConfigResult<DaemonConfig> {
    let home_dir = match home_override {
        Some(h) => h.to_path_buf(),
        None => directories::UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .ok_or(ConfigError::NoHomeDirectory)?,
    };

    let user_path = home_dir.join(".otus").join("config.toml");
    let mut config = match try_load_file(&user_path)? {
        Some(config) => {
            info!(path = %user_path.display(), "loaded user config");
            config
        },
        None => {
            debug!(path = %user_path.display(), "no user config file, using defaults");
            DaemonConfig::default()
        },
    };

    apply_env_overrides(&mut config)?;

    Ok(config)
}

/// Parse `~/.otus/config.toml` if present. Missing fields fall back to
/// [`DaemonConfig::default`] via the struct's container-level
/// `#[serde(default)]`, so a file overriding only `model` is valid.
fn try_load_file(path: &Path) -> ConfigResult<Option<DaemonConfig>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let config = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                source: e,
            })?;
            Ok(Some(config))
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

/// Apply `OTUS_`-prefixed environment variable overrides in place.
fn apply_env_overrides(config: &mut DaemonConfig) -> ConfigResult<()> {
    if let Some(value) = env_var("OTUS_SOCKET_PATH") {
        config.socket_path = PathBuf::from(value);
    }
    if let Some(value) = env_var("OTUS_PID_PATH") {
        config.pid_path = PathBuf::from(value);
    }
    if let Some(value) = env_var("OTUS_MAX_ITERATIONS") {
        config.max_iterations = parse_env("OTUS_MAX_ITERATIONS", &value)?;
    }
    if let Some(value) = env_var("OTUS_API_TIMEOUT_SECS") {
        config.api_timeout_secs = parse_env("OTUS_API_TIMEOUT_SECS", &value)?;
    }
    if let Some(value) = env_var("OTUS_RAG_TOP_K") {
        config.rag_top_k = parse_env("OTUS_RAG_TOP_K", &value)?;
    }
    if let Some(value) = env_var("OTUS_MODEL") {
        config.model = value;
    }
    if let Some(value) = env_var("OTUS_POOL_TARGET_SIZE") {
        config.pool_target_size = parse_env("OTUS_POOL_TARGET_SIZE", &value)?;
    }
    if let Some(value) = env_var("OTUS_TERMINAL_DEFAULT_LINES") {
        config.terminal_default_lines = parse_env("OTUS_TERMINAL_DEFAULT_LINES", &value)?;
    }
    if let Some(value) = env_var("OTUS_KERNEL_IMAGE") {
        config.kernel_image = PathBuf::from(value);
    }
    if let Some(value) = env_var("OTUS_ROOT_FS") {
        config.root_fs = PathBuf::from(value);
    }
    if let Some(value) = env_var("OTUS_CONTROL_SOCKET_DIR") {
        config.control_socket_dir = PathBuf::from(value);
    }
    if let Some(value) = env_var("OTUS_GUEST_RPC_PORT") {
        config.guest_rpc_port = parse_env("OTUS_GUEST_RPC_PORT", &value)?;
    }
    if let Some(value) = env_var("OTUS_RPC_TIMEOUT_SECS") {
        config.rpc_timeout_secs = parse_env("OTUS_RPC_TIMEOUT_SECS", &value)?;
    }
    if let Some(value) = env_var("OTUS_NETWORKING_ENABLED") {
        config.networking_enabled = parse_env("OTUS_NETWORKING_ENABLED", &value)?;
    }
    if let Some(value) = env_var("OTUS_TAP_CONFIG_PATH") {
        config.tap_config_path = PathBuf::from(value);
    }
    if let Some(value) = env_var("OTUS_HYPERVISOR_BINARY") {
        config.hypervisor_binary = PathBuf::from(value);
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> ConfigResult<T> {
    value.parse().map_err(|_| ConfigError::InvalidEnvValue {
        var: var.to_owned(),
        value: value.to_owned(),
    })
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Environment variables are process-global; serialise tests that touch
    /// `OTUS_*` so they don't race each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn falls_back_to_defaults_when_no_user_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let config = load(Some(dir.path())).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
    }

    #[test]
    fn user_file_overrides_only_set_fields() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(".otus")).unwrap();
        std::fs::write(
            dir.path().join(".otus/config.toml"),
            "model = \"gpt-4o\"\nmax_iterations = 40\n",
        )
        .unwrap();

        let config = load(Some(dir.path())).unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.max_iterations, 40);
        assert_eq!(config.rag_top_k, 8);
    }

    #[test]
    fn malformed_user_file_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(".otus")).unwrap();
        std::fs::write(dir.path().join(".otus/config.toml"), "not valid toml <<<").unwrap();

        assert!(matches!(load(Some(dir.path())), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn env_var_overrides_file_and_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        // SAFETY: this test holds ENV_LOCK for its duration, so no other
        // test observes the mutated environment concurrently.
        unsafe {
            std::env::set_var("OTUS_MODEL", "env-model");
            std::env::set_var("OTUS_MAX_ITERATIONS", "99");
        }

        let result = load(Some(dir.path()));

        unsafe {
            std::env::remove_var("OTUS_MODEL");
            std::env::remove_var("OTUS_MAX_ITERATIONS");
        }

        let config = result.unwrap();
        assert_eq!(config.model, "env-model");
        assert_eq!(config.max_iterations, 99);
    }

    #[test]
    fn invalid_env_value_is_reported() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        unsafe {
            std::env::set_var("OTUS_MAX_ITERATIONS", "not-a-number");
        }

        let result = load(Some(dir.path()));

        unsafe {
            std::env::remove_var("OTUS_MAX_ITERATIONS");
        }

        assert!(matches!(result, Err(ConfigError::InvalidEnvValue { .. })));
    }
}
