//! Error types for device access.

use thiserror::Error;
use tm_core::FailureReason;

pub type ReadResult<T> = Result<T, ReadError>;
pub type DeviceCommandResult<T> = Result<T, DeviceCommandError>;
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// A single channel read failed. Always recovered as a failure marker.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReadError {
    #[error("read timed out")]
    Timeout,

    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ReadError {
    /// Failure marker recorded in the snapshot for this error.
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Timeout => FailureReason::Timeout,
            Self::Unreachable(_) => FailureReason::Unreachable,
            Self::Malformed(_) => FailureReason::Malformed,
        }
    }
}

/// The device could not carry out a command.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceCommandError {
    #[error("command timed out")]
    Timeout,

    #[error("device rejected command: {0}")]
    Rejected(String),

    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("command not supported by this device: {0}")]
    Unsupported(String),
}

/// A remote request could not be turned into a [`DeviceCommand`](crate::DeviceCommand).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandParseError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("missing parameter '{param}' for {command}")]
    MissingParameter {
        command: &'static str,
        param: &'static str,
    },

    #[error("invalid value for '{param}': {value}")]
    InvalidValue { param: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("serial port enumeration failed: {0}")]
    Enumerate(#[from] serialport::Error),
}
