//! Operator commands routed to devices.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tm_devices::{CommandParseError, DeviceCommand, DeviceCommandError};
use tracing::{info, warn};

use crate::registry::DeviceSet;
use crate::token::Holder;

/// Confirmation that a device carried out a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub device: String,
    pub command: String,
    /// Instrument reply, empty when the protocol has none.
    pub reply: String,
    pub completed_at: DateTime<Utc>,
}

/// Why a command was not carried out. Only ever returned to the requester.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum CommandError {
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Device '{device}' did not complete the command in time")]
    DeviceTimeout { device: String },

    #[error("Device '{device}' rejected the command: {reason}")]
    Rejected { device: String, reason: String },

    #[error("Invalid command: {0}")]
    Invalid(String),

    #[error("Device '{device}' unreachable: {reason}")]
    Unreachable { device: String, reason: String },
}

impl CommandError {
    /// Stable identifier for the remote error response.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownDevice(_) => "unknown_device",
            Self::DeviceTimeout { .. } => "device_timeout",
            Self::Rejected { .. } => "rejected",
            Self::Invalid(_) => "invalid",
            Self::Unreachable { .. } => "unreachable",
        }
    }
}

impl From<CommandParseError> for CommandError {
    fn from(e: CommandParseError) -> Self {
        Self::Invalid(e.to_string())
    }
}

/// Routes commands to devices, sharing each device's token with the
/// sampler. `timeout` bounds the wait for the device and the execution
/// together.
#[derive(Clone)]
pub struct CommandChannel {
    devices: Arc<DeviceSet>,
    timeout: Duration,
}

impl CommandChannel {
    pub fn new(devices: Arc<DeviceSet>, timeout: Duration) -> Self {
        Self { devices, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn apply(&self, device: &str, command: &DeviceCommand) -> Result<Ack, CommandError> {
        let dev = self
            .devices
            .get(device)
            .ok_or_else(|| CommandError::UnknownDevice(device.to_string()))?;
        let timed_out = || CommandError::DeviceTimeout {
            device: device.to_string(),
        };

        let started = Instant::now();
        let Some(mut handle) = dev.token.try_acquire_for(Holder::Command, self.timeout) else {
            warn!(device, %command, "Device busy past command timeout");
            return Err(timed_out());
        };

        let remaining = self.timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(timed_out());
        }

        let exec_started = Instant::now();
        let result = handle.apply_command(command, remaining);
        drop(handle);

        match result {
            Ok(_) if exec_started.elapsed() > remaining => {
                warn!(device, %command, "Command completed after its timeout");
                Err(timed_out())
            }
            Ok(reply) => {
                info!(device, %command, "Command applied");
                Ok(Ack {
                    device: device.to_string(),
                    command: command.to_string(),
                    reply,
                    completed_at: Utc::now(),
                })
            }
            Err(DeviceCommandError::Timeout) => Err(timed_out()),
            Err(DeviceCommandError::Rejected(reason) | DeviceCommandError::Unsupported(reason)) => {
                Err(CommandError::Rejected {
                    device: device.to_string(),
                    reason,
                })
            }
            Err(DeviceCommandError::Unreachable(reason)) => Err(CommandError::Unreachable {
                device: device.to_string(),
                reason,
            }),
        }
    }

    /// Apply a command in the remote `{command, parameters}` form.
    pub fn apply_request(
        &self,
        device: &str,
        command: &str,
        parameters: &BTreeMap<String, serde_json::Value>,
    ) -> Result<Ack, CommandError> {
        if self.devices.get(device).is_none() {
            return Err(CommandError::UnknownDevice(device.to_string()));
        }
        let command = DeviceCommand::from_request(command, parameters)?;
        self.apply(device, &command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Device;
    use tm_devices::{SimConfig, SimulatedInstrument};

    fn channel(latency_ms: u64, timeout_ms: u64) -> CommandChannel {
        let channels = vec!["A".to_string()];
        let sim = SimulatedInstrument::new(
            "Bench",
            &channels,
            SimConfig {
                latency_ms,
                ..Default::default()
            },
        );
        let device = Device::new("Bench", channels, Duration::from_secs(1), Box::new(sim));
        CommandChannel::new(
            Arc::new(DeviceSet::new(vec![device])),
            Duration::from_millis(timeout_ms),
        )
    }

    #[test]
    fn unknown_device() {
        let err = channel(0, 100)
            .apply("Nope", &DeviceCommand::parse_shorthand("setpoint=77").unwrap())
            .unwrap_err();
        assert_eq!(err, CommandError::UnknownDevice("Nope".into()));
        assert_eq!(err.kind(), "unknown_device");
    }

    #[test]
    fn setpoint_is_acknowledged() {
        let ack = channel(0, 100)
            .apply("Bench", &DeviceCommand::parse_shorthand("setpoint=77").unwrap())
            .unwrap();
        assert_eq!(ack.device, "Bench");
        assert_eq!(ack.command, "setpoint@1=77");
    }

    #[test]
    fn raw_rejected_by_simulator() {
        let err = channel(0, 100)
            .apply("Bench", &DeviceCommand::Raw { line: "*IDN?".into() })
            .unwrap_err();
        assert!(matches!(err, CommandError::Rejected { .. }));
    }

    #[test]
    fn slow_device_times_out() {
        let err = channel(200, 50)
            .apply("Bench", &DeviceCommand::parse_shorthand("heater=on").unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), "device_timeout");
    }

    #[test]
    fn malformed_request_is_invalid() {
        let err = channel(0, 100)
            .apply_request("Bench", "explode", &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, CommandError::Invalid(_)));
    }
}
