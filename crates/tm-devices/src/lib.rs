//! Instrument access for tempmon.
//!
//! The sampler and the command channel only ever see the
//! [`DeviceHandle`] capability. Everything behind it (line protocols,
//! serial ports, reconnection, simulation) lives in this crate, together
//! with the [`Discovery`] collaborator that turns configuration into
//! opened handles.

pub mod command;
pub mod discovery;
pub mod error;
pub mod handle;
pub mod instrument;
pub mod protocol;
pub mod sim;
pub mod transport;

pub use command::DeviceCommand;
pub use discovery::{
    ConfiguredDiscovery, ConnectionSpec, DeviceSpec, DiscoveredDevice, Discovery, PortCandidate,
    list_ports,
};
pub use error::{
    CommandParseError, DeviceCommandError, DeviceCommandResult, DiscoveryError, DiscoveryResult,
    ReadError, ReadResult,
};
pub use handle::DeviceHandle;
pub use instrument::LineInstrument;
pub use protocol::{Family, ProtocolOverrides, ProtocolTemplates};
pub use sim::{SimConfig, SimulatedInstrument};
pub use transport::{SerialTransport, Transport};
