//! Remote control surface: newline-delimited JSON over TCP.
//!
//! Each line from a client is one [`Request`]; each gets exactly one
//! [`Response`] line back. There is no authentication.

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tm_core::{Snapshot, TickStats, TickStatsSummary};
use tm_devices::DeviceCommand;
use tracing::{debug, info, warn};

use crate::command::{Ack, CommandChannel};
use crate::error::{AppError, AppResult};
use crate::live::LiveView;
use crate::registry::{DeviceInfo, DeviceSet};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Command {
        device: String,
        command: String,
        #[serde(default)]
        parameters: BTreeMap<String, serde_json::Value>,
    },
    Live,
    Devices,
    Stats,
}

impl Request {
    /// Remote form of a typed command.
    pub fn command(device: &str, command: &DeviceCommand) -> Self {
        let mut parameters = BTreeMap::new();
        match command {
            DeviceCommand::SetSetpoint { output, kelvin } => {
                parameters.insert("output".to_string(), output.as_str().into());
                parameters.insert("value".to_string(), (*kelvin).into());
            }
            DeviceCommand::SetHeater { output, enabled } => {
                parameters.insert("output".to_string(), output.as_str().into());
                parameters.insert("enabled".to_string(), (*enabled).into());
            }
            DeviceCommand::Raw { line } => {
                parameters.insert("line".to_string(), line.as_str().into());
            }
        }
        Self::Command {
            device: device.to_string(),
            command: command.name().to_string(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok {
        #[serde(flatten)]
        body: Reply,
    },
    Error {
        kind: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Ack(Ack),
    Live(Snapshot),
    Devices(Vec<DeviceInfo>),
    Stats(TickStatsSummary),
}

impl Response {
    fn error(kind: &str, message: impl Into<String>) -> Self {
        Self::Error {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

/// Everything a connection needs to answer requests.
#[derive(Clone)]
pub struct ServerContext {
    pub commands: CommandChannel,
    pub live: LiveView,
    pub devices: Arc<DeviceSet>,
    pub stats: Arc<TickStats>,
}

impl ServerContext {
    pub fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::Command {
                device,
                command,
                parameters,
            } => match self.commands.apply_request(&device, &command, &parameters) {
                Ok(ack) => Response::Ok {
                    body: Reply::Ack(ack),
                },
                Err(e) => Response::error(e.kind(), e.to_string()),
            },
            Request::Live => Response::Ok {
                body: Reply::Live(Snapshot::clone(&self.live.read())),
            },
            Request::Devices => Response::Ok {
                body: Reply::Devices(self.devices.infos()),
            },
            Request::Stats => Response::Ok {
                body: Reply::Stats(self.stats.summary()),
            },
        }
    }

    /// Parse one request line and answer it.
    pub fn handle_line(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle_request(request),
            Err(e) => Response::error("bad_request", e.to_string()),
        }
    }
}

pub struct ControlServer {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ControlServer {
    pub fn bind(addr: &str, ctx: ServerContext) -> AppResult<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("control-accept".to_string())
                .spawn(move || accept_loop(&listener, &ctx, &stop))
                .map_err(|source| AppError::Spawn {
                    what: "control server",
                    source,
                })?
        };
        info!(%addr, "Control server listening");

        Ok(Self {
            addr,
            stop,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting. Open connections end when their client disconnects.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: &TcpListener, ctx: &ServerContext, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let ctx = ctx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("control-{peer}"))
                    .spawn(move || {
                        if let Err(e) = serve_connection(stream, &ctx) {
                            debug!(%peer, error = %e, "Connection closed with error");
                        }
                    });
                if let Err(e) = spawned {
                    warn!(%peer, error = %e, "Failed to start connection thread");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!(error = %e, "Accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    debug!("Control server stopped");
}

fn serve_connection(stream: TcpStream, ctx: &ServerContext) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = ctx.handle_line(&line);
        let mut out = serde_json::to_vec(&response).map_err(io::Error::other)?;
        out.push(b'\n');
        writer.write_all(&out)?;
        writer.flush()?;
    }
    Ok(())
}

/// Send one request and wait for its response.
pub fn request(addr: &str, request: &Request, timeout: Duration) -> AppResult<Response> {
    let target = addr.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, format!("cannot resolve {addr}"))
    })?;
    let mut stream = TcpStream::connect_timeout(&target, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let mut line = serde_json::to_vec(request).map_err(io::Error::other)?;
    line.push(b'\n');
    stream.write_all(&line)?;

    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply)?;
    let response = serde_json::from_str(&reply)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(response)
}
