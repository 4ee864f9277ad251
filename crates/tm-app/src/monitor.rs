//! Monitor wiring: devices, sampler, history, live state, commands and the
//! optional control server, started and stopped as one unit.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use tm_core::{Snapshot, TickStats, TickStatsSummary};
use tm_devices::Discovery;
use tm_history::{HistorySink, JsonlHistory};
use tracing::{info, warn};

use crate::command::CommandChannel;
use crate::config::{MonitorConfig, validate_config};
use crate::error::{AppError, AppResult};
use crate::live::{LiveView, live_state};
use crate::registry::{Device, DeviceSet};
use crate::sampler::Sampler;
use crate::server::{ControlServer, ServerContext};

pub struct Monitor {
    devices: Arc<DeviceSet>,
    live: LiveView,
    stats: Arc<TickStats>,
    commands: CommandChannel,
    server: Option<ControlServer>,
    stop: Option<Sender<()>>,
    sampler: Option<JoinHandle<()>>,
    history_path: Option<PathBuf>,
}

impl Monitor {
    /// Discover devices, open a new history file and start sampling.
    ///
    /// Returns [`AppError::NoDevices`] when discovery finds nothing; the
    /// caller treats that as a clean exit.
    pub fn start(config: &MonitorConfig, discovery: &dyn Discovery) -> AppResult<Self> {
        validate_config(config)?;

        let found = discovery.discover()?;
        if found.is_empty() {
            return Err(AppError::NoDevices);
        }
        let devices: DeviceSet = found.into_iter().map(Device::from_discovered).collect();

        let history = JsonlHistory::create_in(&config.history.dir, Utc::now())?;
        let history_path = history.path().to_path_buf();
        info!(path = %history_path.display(), "Writing history");

        let mut monitor = Self::start_with(config, devices, Box::new(history))?;
        monitor.history_path = Some(history_path);
        Ok(monitor)
    }

    /// Start sampling already-connected devices into `history`.
    pub fn start_with(
        config: &MonitorConfig,
        devices: DeviceSet,
        history: Box<dyn HistorySink>,
    ) -> AppResult<Self> {
        let devices = Arc::new(devices);
        let stats = Arc::new(TickStats::new());
        let (publisher, live) = live_state();
        let commands = CommandChannel::new(Arc::clone(&devices), config.command_timeout());

        let server = match &config.server {
            Some(server) => Some(ControlServer::bind(
                &server.bind,
                ServerContext {
                    commands: commands.clone(),
                    live: live.clone(),
                    devices: Arc::clone(&devices),
                    stats: Arc::clone(&stats),
                },
            )?),
            None => None,
        };

        let sampler = Sampler::new(
            &devices,
            history,
            publisher,
            Arc::clone(&stats),
            config.sample_period(),
        )?;
        let (stop, stop_rx) = mpsc::channel();
        let sampler = sampler.spawn(stop_rx)?;

        for device in devices.iter() {
            info!(
                device = %device.name,
                connection = %device.description(),
                channels = device.channels.len(),
                "Monitoring device"
            );
        }

        Ok(Self {
            devices,
            live,
            stats,
            commands,
            server,
            stop: Some(stop),
            sampler: Some(sampler),
            history_path: None,
        })
    }

    pub fn devices(&self) -> &DeviceSet {
        &self.devices
    }

    pub fn live(&self) -> &LiveView {
        &self.live
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.live.read()
    }

    pub fn commands(&self) -> &CommandChannel {
        &self.commands
    }

    pub fn stats(&self) -> TickStatsSummary {
        self.stats.summary()
    }

    pub fn history_path(&self) -> Option<&std::path::Path> {
        self.history_path.as_deref()
    }

    pub fn server_addr(&self) -> Option<std::net::SocketAddr> {
        self.server.as_ref().map(ControlServer::local_addr)
    }

    /// Whether the sampler thread is still ticking.
    pub fn is_running(&self) -> bool {
        self.sampler.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Block until `ticks` ticks have completed, `timeout` passes or the
    /// sampler stops.
    pub fn wait_for_ticks(&self, ticks: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.stats.ticks() < ticks {
            if Instant::now() >= deadline || !self.is_running() {
                return self.stats.ticks() >= ticks;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }

    /// Stop the control server and the sampler, waiting for the current
    /// tick to finish.
    pub fn shutdown(&mut self) {
        if let Some(mut server) = self.server.take() {
            server.shutdown();
        }
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(sampler) = self.sampler.take() {
            if sampler.join().is_err() {
                warn!("Sampler thread panicked");
            }
            let summary = self.stats.summary();
            info!(
                ticks = summary.ticks,
                overruns = summary.overruns,
                history_failures = summary.history_failures,
                "Monitor stopped"
            );
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
