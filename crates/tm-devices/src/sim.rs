//! Simulated instrument for dry runs and demos.
//!
//! Each channel settles toward its output's setpoint while the heater is
//! on and drifts back to the base temperature while it is off.

use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tm_core::{Temperature, k};

use crate::command::DeviceCommand;
use crate::error::{DeviceCommandError, DeviceCommandResult, ReadError, ReadResult};
use crate::handle::DeviceHandle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Time each read or command takes.
    pub latency_ms: u64,
    pub base_kelvin: f64,
    /// Channels that always report the device as unreachable.
    pub failing_channels: Vec<String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            latency_ms: 20,
            base_kelvin: 4.0,
            failing_channels: Vec::new(),
        }
    }
}

pub struct SimulatedInstrument {
    name: String,
    config: SimConfig,
    failing: BTreeSet<String>,
    temperatures: BTreeMap<String, f64>,
    setpoint: Option<f64>,
    heater: bool,
    reads: u64,
}

impl SimulatedInstrument {
    pub fn new(name: &str, channels: &[String], config: SimConfig) -> Self {
        Self {
            name: name.to_string(),
            failing: config.failing_channels.iter().cloned().collect(),
            temperatures: channels
                .iter()
                .map(|ch| (ch.clone(), config.base_kelvin))
                .collect(),
            setpoint: None,
            heater: false,
            reads: 0,
            config,
        }
    }

    /// Sleep for the configured latency, capped at `timeout`. Returns
    /// `false` when the latency exceeded the timeout.
    fn wait(&self, timeout: Duration) -> bool {
        let latency = Duration::from_millis(self.config.latency_ms);
        thread::sleep(latency.min(timeout));
        latency <= timeout
    }
}

impl DeviceHandle for SimulatedInstrument {
    fn read_channel(&mut self, channel: &str, timeout: Duration) -> ReadResult<Temperature> {
        if !self.wait(timeout) {
            return Err(ReadError::Timeout);
        }
        if self.failing.contains(channel) {
            return Err(ReadError::Unreachable(format!("{channel} not responding")));
        }
        let target = match (self.heater, self.setpoint) {
            (true, Some(sp)) => sp,
            _ => self.config.base_kelvin,
        };
        self.reads += 1;
        let wobble = 0.005 * (self.reads as f64 * 0.7).sin();
        let t = self
            .temperatures
            .get_mut(channel)
            .ok_or_else(|| ReadError::Malformed(format!("no channel {channel}")))?;
        *t += 0.2 * (target - *t);
        Ok(k((*t + wobble).max(0.0)))
    }

    fn apply_command(
        &mut self,
        command: &DeviceCommand,
        timeout: Duration,
    ) -> DeviceCommandResult<String> {
        if !self.wait(timeout) {
            return Err(DeviceCommandError::Timeout);
        }
        match command {
            DeviceCommand::SetSetpoint { kelvin, .. } => {
                self.setpoint = Some(*kelvin);
                Ok(format!("setpoint {kelvin}"))
            }
            DeviceCommand::SetHeater { enabled, .. } => {
                self.heater = *enabled;
                Ok(format!("heater {}", if *enabled { "on" } else { "off" }))
            }
            DeviceCommand::Raw { line } => Err(DeviceCommandError::Rejected(format!(
                "raw commands not simulated: {line}"
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("simulated@{}", self.name)
    }
}
