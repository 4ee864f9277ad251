//! Error types for the tm-app service layer.

use std::path::PathBuf;

/// Startup and wiring errors, plus a sampler that died under a waiting caller.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Failed to read config file: {path}")]
    ConfigFileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("Config validation failed: {0}")]
    Config(#[from] ConfigError),

    #[error("No devices found")]
    NoDevices,

    #[error("Device discovery failed: {0}")]
    Discovery(#[from] tm_devices::DiscoveryError),

    #[error("History storage unavailable: {0}")]
    Storage(#[from] tm_history::HistoryError),

    #[error("Failed to start {what}: {source}")]
    Spawn {
        what: &'static str,
        source: std::io::Error,
    },

    #[error("Sampler stopped after {ticks} ticks")]
    SamplerStopped { ticks: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tm-app operations.
pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Duplicate device name: {0}")]
    DuplicateDevice(String),

    #[error("Device '{0}' has no channels")]
    NoChannels(String),

    #[error("Duplicate channel '{channel}' on device '{device}'")]
    DuplicateChannel { device: String, channel: String },

    #[error("Invalid {what} name: '{name}'")]
    InvalidName { what: &'static str, name: String },

    #[error("Invalid value: {field} = {value} (must be positive and finite)")]
    InvalidDuration { field: String, value: f64 },
}
