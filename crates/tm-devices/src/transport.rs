//! Byte transports underneath the line protocol.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info, warn};

/// Line-oriented request/response channel to one instrument.
pub trait Transport: Send {
    fn send_line(&mut self, line: &str, timeout: Duration) -> io::Result<()>;

    /// Read up to and excluding the next `\n` (a trailing `\r` is stripped).
    /// Fails with [`io::ErrorKind::TimedOut`] once `timeout` has elapsed.
    fn read_line(&mut self, timeout: Duration) -> io::Result<String>;

    /// Drop any buffered or in-flight input so a late reply to an abandoned
    /// request cannot be mistaken for the answer to the next one.
    fn discard_input(&mut self) -> io::Result<()>;

    fn describe(&self) -> String;
}

/// Serial port transport that reopens the port after any I/O failure.
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
    pending: Vec<u8>,
}

impl SerialTransport {
    /// Open the port right away so discovery can report a missing device.
    pub fn open(path: &str, baud_rate: u32) -> io::Result<Self> {
        let mut transport = Self {
            path: path.to_string(),
            baud_rate,
            port: None,
            pending: Vec::new(),
        };
        transport.ensure_open()?;
        Ok(transport)
    }

    fn ensure_open(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        if self.port.is_none() {
            let port = serialport::new(&self.path, self.baud_rate)
                .timeout(Duration::from_millis(500))
                .flow_control(serialport::FlowControl::None)
                .open()
                .map_err(io::Error::from)?;
            info!(port = %self.path, baud = self.baud_rate, "serial port opened");
            self.pending.clear();
            self.port = Some(port);
        }
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
    }

    fn drop_port(&mut self, err: &io::Error) {
        if self.port.take().is_some() {
            warn!(port = %self.path, error = %err, "serial port lost; will reopen on next use");
        }
        self.pending.clear();
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

impl Transport for SerialTransport {
    fn send_line(&mut self, line: &str, timeout: Duration) -> io::Result<()> {
        let result = (|| {
            let port = self.ensure_open()?;
            port.set_timeout(timeout).map_err(io::Error::from)?;
            port.write_all(line.as_bytes())?;
            port.flush()
        })();
        if let Err(e) = &result {
            if e.kind() != io::ErrorKind::TimedOut {
                self.drop_port(e);
            }
        }
        result
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<String> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no reply"));
            }
            let read = self.ensure_open().and_then(|port| {
                port.set_timeout(remaining).map_err(io::Error::from)?;
                port.read(&mut chunk)
            });
            match read {
                Ok(0) => {}
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => {
                    self.drop_port(&e);
                    return Err(e);
                }
            }
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        if let Some(port) = self.port.as_mut() {
            port.clear(ClearBuffer::Input).map_err(io::Error::from)?;
            debug!(port = %self.path, "input buffer cleared");
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}
