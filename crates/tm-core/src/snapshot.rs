//! Per-tick readings model.
//!
//! A [`Snapshot`] holds one [`ChannelReading`] for every configured channel
//! of every configured device, in configuration order. A failed channel
//! carries a [`FailureReason`] instead of a value; it is never filled with
//! a made-up number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, DeviceName};
use crate::units::{Temperature, as_kelvin};

/// Why a channel has no value this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The read did not complete within the per-read timeout.
    Timeout,
    /// The device could not be reached (port closed, I/O error).
    Unreachable,
    /// The device answered with something that is not a temperature.
    Malformed,
    /// The device was still serving the previous tick.
    Busy,
}

impl FailureReason {
    pub fn label(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unreachable => "unreachable",
            Self::Malformed => "malformed",
            Self::Busy => "busy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReadingValue {
    Ok { kelvin: f64 },
    Failed { reason: FailureReason },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelReading {
    pub channel: ChannelId,
    pub value: ReadingValue,
    pub read_at: DateTime<Utc>,
}

impl ChannelReading {
    pub fn ok(channel: impl Into<ChannelId>, temperature: Temperature, read_at: DateTime<Utc>) -> Self {
        Self {
            channel: channel.into(),
            value: ReadingValue::Ok {
                kelvin: as_kelvin(temperature),
            },
            read_at,
        }
    }

    pub fn failed(channel: impl Into<ChannelId>, reason: FailureReason, read_at: DateTime<Utc>) -> Self {
        Self {
            channel: channel.into(),
            value: ReadingValue::Failed { reason },
            read_at,
        }
    }

    /// Kelvin value, or `None` for a failure marker.
    pub fn kelvin(&self) -> Option<f64> {
        match self.value {
            ReadingValue::Ok { kelvin } => Some(kelvin),
            ReadingValue::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<FailureReason> {
        match self.value {
            ReadingValue::Ok { .. } => None,
            ReadingValue::Failed { reason } => Some(reason),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.value, ReadingValue::Ok { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReadings {
    pub device: DeviceName,
    pub channels: Vec<ChannelReading>,
}

impl DeviceReadings {
    /// Every channel marked with the same failure.
    pub fn all_failed(
        device: impl Into<DeviceName>,
        channels: &[ChannelId],
        reason: FailureReason,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            device: device.into(),
            channels: channels
                .iter()
                .map(|ch| ChannelReading::failed(ch.clone(), reason, at))
                .collect(),
        }
    }

    pub fn get(&self, channel: &str) -> Option<&ChannelReading> {
        self.channels.iter().find(|r| r.channel == channel)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Tick sequence number; 0 is the empty startup snapshot.
    pub tick: u64,
    pub time: DateTime<Utc>,
    /// Seconds since the sampler started.
    pub elapsed_s: f64,
    pub devices: Vec<DeviceReadings>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            tick: 0,
            time: DateTime::<Utc>::default(),
            elapsed_s: 0.0,
            devices: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn device(&self, name: &str) -> Option<&DeviceReadings> {
        self.devices.iter().find(|d| d.device == name)
    }

    pub fn get(&self, device: &str, channel: &str) -> Option<&ChannelReading> {
        self.device(device).and_then(|d| d.get(channel))
    }

    pub fn kelvin(&self, device: &str, channel: &str) -> Option<f64> {
        self.get(device, channel).and_then(ChannelReading::kelvin)
    }

    /// All readings with their device name, in configuration order.
    pub fn readings(&self) -> impl Iterator<Item = (&str, &ChannelReading)> {
        self.devices
            .iter()
            .flat_map(|d| d.channels.iter().map(move |r| (d.device.as_str(), r)))
    }

    pub fn entry_count(&self) -> usize {
        self.devices.iter().map(|d| d.channels.len()).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.readings().filter(|(_, r)| !r.is_ok()).count()
    }
}
