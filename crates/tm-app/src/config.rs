//! Monitor configuration file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tm_core::is_valid_name;
use tm_devices::DeviceSpec;

use crate::error::{AppError, AppResult, ConfigError};

fn default_sample_period_s() -> f64 {
    2.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_sample_period_s")]
    pub sample_period_s: f64,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub commands: CommandConfig,
    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub dir: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("history"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address for the remote control surface, e.g. `0.0.0.0:8084`.
    pub bind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Limit on waiting for a device plus executing the command.
    pub timeout_s: f64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self { timeout_s: 5.0 }
    }
}

impl MonitorConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_secs_f64(self.sample_period_s)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.commands.timeout_s)
    }
}

/// Load and validate a YAML config file.
pub fn load_config(path: &Path) -> AppResult<MonitorConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AppError::ConfigFileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_config(&content)
}

pub fn parse_config(yaml: &str) -> AppResult<MonitorConfig> {
    let config: MonitorConfig = serde_yaml::from_str(yaml)?;
    validate_config(&config)?;
    Ok(config)
}

fn check_duration(field: String, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value < 1.0e9 {
        Ok(())
    } else {
        Err(ConfigError::InvalidDuration { field, value })
    }
}

pub fn validate_config(config: &MonitorConfig) -> Result<(), ConfigError> {
    check_duration("sample_period_s".to_string(), config.sample_period_s)?;
    check_duration("commands.timeout_s".to_string(), config.commands.timeout_s)?;

    let mut names = HashSet::new();
    for device in &config.devices {
        if !is_valid_name(&device.name) {
            return Err(ConfigError::InvalidName {
                what: "device",
                name: device.name.clone(),
            });
        }
        if !names.insert(device.name.as_str()) {
            return Err(ConfigError::DuplicateDevice(device.name.clone()));
        }
        check_duration(
            format!("{}.read_timeout_s", device.name),
            device.read_timeout_s,
        )?;
        if device.channels.is_empty() {
            return Err(ConfigError::NoChannels(device.name.clone()));
        }
        let mut channels = HashSet::new();
        for channel in &device.channels {
            if !is_valid_name(channel) {
                return Err(ConfigError::InvalidName {
                    what: "channel",
                    name: channel.clone(),
                });
            }
            if !channels.insert(channel.as_str()) {
                return Err(ConfigError::DuplicateChannel {
                    device: device.name.clone(),
                    channel: channel.clone(),
                });
            }
        }
    }
    Ok(())
}
