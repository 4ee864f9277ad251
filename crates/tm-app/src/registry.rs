//! Devices shared between the sampler and the command channel.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tm_core::{ChannelId, DeviceName};
use tm_devices::{DeviceHandle, DiscoveredDevice};

use crate::token::{SerialToken, TokenState};

pub type SharedHandle = Box<dyn DeviceHandle>;

/// A connected instrument and the token guarding it.
pub struct Device {
    pub name: DeviceName,
    pub channels: Vec<ChannelId>,
    pub read_timeout: Duration,
    pub token: SerialToken<SharedHandle>,
    description: String,
}

impl Device {
    pub fn new(
        name: impl Into<DeviceName>,
        channels: Vec<ChannelId>,
        read_timeout: Duration,
        handle: SharedHandle,
    ) -> Self {
        let description = handle.describe();
        Self {
            name: name.into(),
            channels,
            read_timeout,
            token: SerialToken::new(handle),
            description,
        }
    }

    pub fn from_discovered(found: DiscoveredDevice) -> Self {
        let read_timeout = Duration::from_secs_f64(found.spec.read_timeout_s);
        Self::new(found.spec.name, found.spec.channels, read_timeout, found.handle)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Longest a full pass over all channels may take.
    pub fn sweep_budget(&self) -> Duration {
        self.read_timeout
            .saturating_mul(u32::try_from(self.channels.len()).unwrap_or(u32::MAX))
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.name.clone(),
            channels: self.channels.clone(),
            description: self.description.clone(),
            token: self.token.state(),
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("channels", &self.channels)
            .field("read_timeout", &self.read_timeout)
            .field("description", &self.description)
            .finish()
    }
}

/// Device summary for the remote `devices` op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: DeviceName,
    pub channels: Vec<ChannelId>,
    pub description: String,
    pub token: TokenState,
}

/// The fixed, ordered set of devices found at startup.
#[derive(Debug, Clone, Default)]
pub struct DeviceSet {
    devices: Vec<Arc<Device>>,
}

impl DeviceSet {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices: devices.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Device>> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.devices.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn infos(&self) -> Vec<DeviceInfo> {
        self.devices.iter().map(|d| d.info()).collect()
    }
}

impl FromIterator<Device> for DeviceSet {
    fn from_iter<I: IntoIterator<Item = Device>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tm_devices::{SimConfig, SimulatedInstrument};

    fn sim(name: &str, channels: &[&str]) -> Device {
        let channels: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
        let handle = SimulatedInstrument::new(name, &channels, SimConfig::default());
        Device::new(name, channels, Duration::from_millis(250), Box::new(handle))
    }

    #[test]
    fn lookup_keeps_configured_order() {
        let set: DeviceSet = [sim("b", &["x"]), sim("a", &["y", "z"])].into_iter().collect();
        assert_eq!(set.names(), vec!["b", "a"]);
        assert_eq!(set.get("a").unwrap().channels, vec!["y", "z"]);
        assert!(set.get("c").is_none());
    }

    #[test]
    fn sweep_budget_scales_with_channels() {
        let dev = sim("a", &["1", "2", "3"]);
        assert_eq!(dev.sweep_budget(), Duration::from_millis(750));
        assert_eq!(dev.info().token, TokenState::Idle);
    }
}
