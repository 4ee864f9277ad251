//! Turning configured device entries into opened handles.

use serde::{Deserialize, Serialize};
use tm_core::{ChannelId, DeviceName};
use tracing::{info, warn};

use crate::error::DiscoveryResult;
use crate::handle::DeviceHandle;
use crate::instrument::LineInstrument;
use crate::protocol::{Family, ProtocolOverrides};
use crate::sim::{SimConfig, SimulatedInstrument};
use crate::transport::SerialTransport;

fn default_read_timeout_s() -> f64 {
    1.0
}

/// One instrument as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub name: DeviceName,
    pub family: Family,
    pub channels: Vec<ChannelId>,
    #[serde(default = "default_read_timeout_s")]
    pub read_timeout_s: f64,
    pub connection: ConnectionSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
    #[serde(default)]
    pub protocol: ProtocolOverrides,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionSpec {
    /// A fixed port path such as `/dev/ttyUSB0` or `COM3`.
    Port { path: String },
    /// First USB serial port whose descriptors contain both substrings.
    Usb {
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        serial_number: Option<String>,
    },
    Simulated {
        #[serde(flatten)]
        sim: SimConfig,
    },
}

/// A serial port as reported by the operating system.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PortCandidate {
    pub port_name: String,
    pub usb: bool,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl PortCandidate {
    fn matches(&self, description: Option<&str>, serial_number: Option<&str>) -> bool {
        if !self.usb {
            return false;
        }
        let desc_ok = description.is_none_or(|want| {
            [&self.product, &self.manufacturer]
                .iter()
                .any(|field| field.as_deref().is_some_and(|s| s.contains(want)))
        });
        let serial_ok = serial_number.is_none_or(|want| {
            self.serial_number
                .as_deref()
                .is_some_and(|s| s.contains(want))
        });
        desc_ok && serial_ok
    }
}

/// Enumerate serial ports with their USB descriptors.
pub fn list_ports() -> DiscoveryResult<Vec<PortCandidate>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| match p.port_type {
            serialport::SerialPortType::UsbPort(info) => PortCandidate {
                port_name: p.port_name,
                usb: true,
                manufacturer: info.manufacturer,
                product: info.product,
                serial_number: info.serial_number,
            },
            _ => PortCandidate {
                port_name: p.port_name,
                ..Default::default()
            },
        })
        .collect())
}

/// First port matching a USB descriptor rule.
pub fn find_usb_port<'a>(
    ports: &'a [PortCandidate],
    description: Option<&str>,
    serial_number: Option<&str>,
) -> Option<&'a PortCandidate> {
    ports
        .iter()
        .find(|p| p.matches(description, serial_number))
}

/// A device that discovery managed to connect to.
pub struct DiscoveredDevice {
    pub spec: DeviceSpec,
    pub handle: Box<dyn DeviceHandle>,
}

/// Source of connected devices at startup.
///
/// The result is keyed by [`DeviceSpec::name`] and ordered as configured.
/// An empty result is not an error.
pub trait Discovery {
    fn discover(&self) -> DiscoveryResult<Vec<DiscoveredDevice>>;
}

/// Discovery driven by the configuration file.
pub struct ConfiguredDiscovery {
    specs: Vec<DeviceSpec>,
}

impl ConfiguredDiscovery {
    pub fn new(specs: Vec<DeviceSpec>) -> Self {
        Self { specs }
    }

    fn connect(&self, spec: &DeviceSpec, ports: &[PortCandidate]) -> Option<Box<dyn DeviceHandle>> {
        let path = match &spec.connection {
            ConnectionSpec::Simulated { sim } => {
                let handle: Box<dyn DeviceHandle> = Box::new(SimulatedInstrument::new(
                    &spec.name,
                    &spec.channels,
                    sim.clone(),
                ));
                return Some(handle);
            }
            ConnectionSpec::Port { path } => path.clone(),
            ConnectionSpec::Usb {
                description,
                serial_number,
            } => match find_usb_port(ports, description.as_deref(), serial_number.as_deref()) {
                Some(port) => port.port_name.clone(),
                None => {
                    warn!(device = %spec.name, "no USB port matches; device skipped");
                    return None;
                }
            },
        };

        let baud = spec
            .baud_rate
            .unwrap_or_else(|| spec.family.default_baud_rate());
        match SerialTransport::open(&path, baud) {
            Ok(transport) => {
                let protocol = spec
                    .family
                    .default_templates()
                    .with_overrides(&spec.protocol);
                let handle: Box<dyn DeviceHandle> =
                    Box::new(LineInstrument::new(spec.family, protocol, transport));
                Some(handle)
            }
            Err(e) => {
                warn!(device = %spec.name, port = %path, error = %e, "could not open port; device skipped");
                None
            }
        }
    }
}

impl Discovery for ConfiguredDiscovery {
    fn discover(&self) -> DiscoveryResult<Vec<DiscoveredDevice>> {
        let needs_usb = self
            .specs
            .iter()
            .any(|s| matches!(s.connection, ConnectionSpec::Usb { .. }));
        let ports = if needs_usb { list_ports()? } else { Vec::new() };

        let mut found = Vec::new();
        for spec in &self.specs {
            if let Some(handle) = self.connect(spec, &ports) {
                info!(device = %spec.name, handle = %handle.describe(), "device connected");
                found.push(DiscoveredDevice {
                    spec: spec.clone(),
                    handle,
                });
            }
        }
        Ok(found)
    }
}
