//! Generic query/response instrument driven by [`ProtocolTemplates`].

use std::io;
use std::time::{Duration, Instant};

use tm_core::{Temperature, checked_k};
use tracing::{debug, warn};

use crate::command::DeviceCommand;
use crate::error::{DeviceCommandError, DeviceCommandResult, ReadError, ReadResult};
use crate::handle::DeviceHandle;
use crate::protocol::{Family, ProtocolTemplates, is_error_reply, parse_temperature};
use crate::transport::Transport;

pub struct LineInstrument<T: Transport> {
    family: Family,
    protocol: ProtocolTemplates,
    transport: T,
}

impl<T: Transport> LineInstrument<T> {
    pub fn new(family: Family, protocol: ProtocolTemplates, transport: T) -> Self {
        Self {
            family,
            protocol,
            transport,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send one line and, if `want_reply`, wait for the answer; both share
    /// a single deadline.
    fn exchange(&mut self, line: &str, want_reply: bool, timeout: Duration) -> io::Result<String> {
        let deadline = Instant::now() + timeout;
        let framed = format!("{line}{}", self.protocol.line_ending);
        self.transport.send_line(&framed, timeout)?;
        if !want_reply {
            return Ok(String::new());
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.transport.read_line(remaining) {
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                // Drop any late reply before the next query goes out.
                if let Err(flush) = self.transport.discard_input() {
                    warn!(
                        transport = %self.transport.describe(),
                        error = %flush,
                        "Could not flush input after timeout"
                    );
                }
                Err(e)
            }
            other => other,
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

impl<T: Transport> DeviceHandle for LineInstrument<T> {
    fn read_channel(&mut self, channel: &str, timeout: Duration) -> ReadResult<Temperature> {
        let query = self.protocol.query_line(channel);
        let reply = self.exchange(&query, true, timeout).map_err(|e| {
            if is_timeout(&e) {
                ReadError::Timeout
            } else {
                ReadError::Unreachable(e.to_string())
            }
        })?;
        let kelvin = parse_temperature(&reply)?;
        checked_k(kelvin).map_err(|e| ReadError::Malformed(e.to_string()))
    }

    fn apply_command(
        &mut self,
        command: &DeviceCommand,
        timeout: Duration,
    ) -> DeviceCommandResult<String> {
        let line = self.protocol.command_line(command)?;
        debug!(device = %self.describe(), %line, "sending command");
        let reply = self
            .exchange(&line, self.protocol.command_reply, timeout)
            .map_err(|e| {
                if is_timeout(&e) {
                    DeviceCommandError::Timeout
                } else {
                    DeviceCommandError::Unreachable(e.to_string())
                }
            })?;
        if is_error_reply(&reply) {
            return Err(DeviceCommandError::Rejected(reply.trim().to_string()));
        }
        Ok(reply.trim().to_string())
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.family.label(), self.transport.describe())
    }
}
