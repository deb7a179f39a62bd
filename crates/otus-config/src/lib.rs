//! Process-wide daemon configuration.
//!
//! This crate has no dependencies on any other internal `otus` crate; it
//! only depends on `serde`, `toml`, `thiserror`, `tracing`, and
//! `directories`.

mod error;
mod loader;
mod types;

pub use error::{ConfigError, ConfigResult};
pub use types::{DaemonConfig, InitOverrides};

impl DaemonConfig {
    /// Load configuration with the full precedence chain: defaults →
    /// `~/.otus/config.toml` → `OTUS_`-prefixed environment variables.
    /// `/init` overrides are applied separately via
    /// [`DaemonConfig::apply_overrides`] once a workspace session opens.
    ///
    /// # Errors
    /// See [`loader::load`].
    pub fn load() -> ConfigResult<Self> {
        loader::load(None)
    }

    /// As [`DaemonConfig::load`] but resolving `~/.otus` under `home_dir`
    /// instead of the platform home directory. Exposed for tests and for
    /// embedding contexts that don't want to touch the real home directory.
    ///
    /// # Errors
    /// See [`loader::load`].
    pub fn load_with_home(home_dir: &std::path::Path) -> ConfigResult<Self> {
        loader::load(Some(home_dir))
    }
}
