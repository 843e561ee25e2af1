use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Failed to read configuration file {path}: {reason}")]
    Io { path: String, reason: String },
}
