//! The Device Handle capability.

use std::time::Duration;

use tm_core::Temperature;

use crate::command::DeviceCommand;
use crate::error::{DeviceCommandResult, ReadResult};

/// One connected instrument.
///
/// Both operations may block; implementations must give up once `timeout`
/// has elapsed and leave the instrument ready for the next call.
/// Reconnecting after a lost connection is the handle's job, never the
/// caller's.
pub trait DeviceHandle: Send {
    /// Read one channel's temperature.
    fn read_channel(&mut self, channel: &str, timeout: Duration) -> ReadResult<Temperature>;

    /// Carry out a control command, returning the instrument's reply (empty
    /// when the protocol has none).
    fn apply_command(
        &mut self,
        command: &DeviceCommand,
        timeout: Duration,
    ) -> DeviceCommandResult<String>;

    /// Short description for logs, e.g. `lakeshore@/dev/ttyUSB0`.
    fn describe(&self) -> String;
}

impl<T: DeviceHandle + ?Sized> DeviceHandle for Box<T> {
    fn read_channel(&mut self, channel: &str, timeout: Duration) -> ReadResult<Temperature> {
        (**self).read_channel(channel, timeout)
    }

    fn apply_command(
        &mut self,
        command: &DeviceCommand,
        timeout: Duration,
    ) -> DeviceCommandResult<String> {
        (**self).apply_command(command, timeout)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
