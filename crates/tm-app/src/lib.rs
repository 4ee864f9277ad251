//! Monitor service layer for tempmon.
//!
//! Wires discovered devices, the sampling loop, the history sink, the live
//! snapshot and the command channel together, and exposes them to the CLI
//! and to remote clients.

pub mod command;
pub mod config;
pub mod error;
pub mod live;
pub mod monitor;
pub mod registry;
pub mod sampler;
pub mod server;
pub mod token;

// Re-export key types for convenience
pub use command::{Ack, CommandChannel, CommandError};
pub use config::{MonitorConfig, load_config, parse_config, validate_config};
pub use error::{AppError, AppResult, ConfigError};
pub use live::{LivePublisher, LiveView, live_state};
pub use monitor::Monitor;
pub use registry::{Device, DeviceInfo, DeviceSet};
pub use sampler::Sampler;
pub use server::{ControlServer, Reply, Request, Response, ServerContext, request};
pub use token::{Holder, SerialToken, TokenGuard, TokenState};
