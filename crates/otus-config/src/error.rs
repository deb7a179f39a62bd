//! Configuration error taxonomy.

use thiserror::Error;

/// Errors raised while locating, parsing, or validating daemon configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The user config file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The user config file exists but is not valid TOML, or doesn't match
    /// the expected shape.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// An `OTUS_`-prefixed environment variable held a value that could not
    /// be parsed into the expected type.
    #[error("environment variable {var} has an invalid value {value:?}")]
    InvalidEnvValue {
        /// Name of the offending environment variable.
        var: String,
        /// Value that failed to parse.
        value: String,
    },

    /// The platform's home directory could not be determined, so the
    /// default `~/.otus` paths cannot be resolved.
    #[error("could not determine home directory")]
    NoHomeDirectory,
}

/// Convenience alias.
pub type ConfigResult<T> = Result<T, ConfigError>;
