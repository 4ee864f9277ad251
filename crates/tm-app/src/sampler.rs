//! The polling loop.
//!
//! Each device gets a long-lived worker thread. Per tick the sampler hands
//! every idle worker a read job, then collects channel readings until each
//! device's deadline. Reads are never cancelled: a sweep that outlives its
//! tick keeps going, and whatever it reports later is put into the tick in
//! progress at that time. A worker still sweeping is not given a new job.
//! Channels it has not reached yet are marked busy; a read that has run
//! past the per-read timeout is marked timeout.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tm_core::{ChannelReading, DeviceReadings, FailureReason, Snapshot, TickStats};
use tm_history::HistorySink;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::live::LivePublisher;
use crate::registry::{Device, DeviceSet};
use crate::token::Holder;

struct ReadJob {
    tick: u64,
}

enum WorkerEvent {
    Reading {
        device_idx: usize,
        channel_idx: usize,
        reading: ChannelReading,
    },
    /// The sweep started for `job` has finished and the token is released.
    SweepDone { device_idx: usize, job: u64 },
}

/// The channel read currently running on a worker.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    channel_idx: usize,
    started: Instant,
}

struct Worker {
    device: Arc<Device>,
    jobs: Sender<ReadJob>,
    in_flight: Arc<Mutex<Option<InFlight>>>,
    /// Tick of the sweep still running, if any.
    job: Option<u64>,
    _handle: JoinHandle<()>,
}

impl Worker {
    fn spawn(
        device_idx: usize,
        device: Arc<Device>,
        events: Sender<WorkerEvent>,
    ) -> AppResult<Self> {
        let (jobs, job_rx) = mpsc::channel::<ReadJob>();
        let in_flight = Arc::new(Mutex::new(None));

        let handle = {
            let device = Arc::clone(&device);
            let in_flight = Arc::clone(&in_flight);
            thread::Builder::new()
                .name(format!("read-{}", device.name))
                .spawn(move || read_loop(device_idx, &device, &job_rx, &events, &in_flight))
                .map_err(|source| AppError::Spawn {
                    what: "device worker",
                    source,
                })?
        };

        Ok(Self {
            device,
            jobs,
            in_flight,
            job: None,
            _handle: handle,
        })
    }

    /// Marker for a channel the sweep has not reported when collection ends.
    fn pending_reason(&self, channel_idx: usize) -> FailureReason {
        match *self.in_flight.lock() {
            Some(f)
                if f.channel_idx == channel_idx
                    && f.started.elapsed() > self.device.read_timeout =>
            {
                FailureReason::Timeout
            }
            _ => FailureReason::Busy,
        }
    }
}

/// Runs on the worker thread until the job channel closes. A sweep always
/// reads every channel, even when nobody is collecting any more.
fn read_loop(
    device_idx: usize,
    device: &Device,
    jobs: &Receiver<ReadJob>,
    events: &Sender<WorkerEvent>,
    in_flight: &Mutex<Option<InFlight>>,
) {
    let mut collector_gone = false;
    for job in jobs {
        {
            let mut handle = device.token.acquire(Holder::Sampler);
            for (channel_idx, channel) in device.channels.iter().enumerate() {
                let started = Instant::now();
                *in_flight.lock() = Some(InFlight {
                    channel_idx,
                    started,
                });
                let result = handle.read_channel(channel, device.read_timeout);
                *in_flight.lock() = None;

                let read_at = Utc::now();
                let reading = match result {
                    Ok(t) if started.elapsed() <= device.read_timeout => {
                        ChannelReading::ok(channel.clone(), t, read_at)
                    }
                    Ok(_) => ChannelReading::failed(channel.clone(), FailureReason::Timeout, read_at),
                    Err(e) => {
                        debug!(device = %device.name, channel = %channel, error = %e, "Read failed");
                        ChannelReading::failed(channel.clone(), e.reason(), read_at)
                    }
                };
                let event = WorkerEvent::Reading {
                    device_idx,
                    channel_idx,
                    reading,
                };
                if events.send(event).is_err() && !collector_gone {
                    collector_gone = true;
                    debug!(device = %device.name, "Sampler gone; finishing sweep unreported");
                }
            }
        }
        let done = WorkerEvent::SweepDone {
            device_idx,
            job: job.tick,
        };
        collector_gone |= events.send(done).is_err();
    }
    debug!(device = %device.name, "Device worker stopped");
}

/// Per-tick collection state for one device.
struct Collecting {
    slots: Vec<Option<ChannelReading>>,
    deadline: Instant,
    open: bool,
}

impl Collecting {
    fn complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }
}

/// Drives the tick loop. Sole writer of the history sink and live state.
pub struct Sampler {
    workers: Vec<Worker>,
    events: Receiver<WorkerEvent>,
    history: Box<dyn HistorySink>,
    live: LivePublisher,
    stats: Arc<TickStats>,
    period: Duration,
    started: Instant,
    tick: u64,
    last_time: Option<DateTime<Utc>>,
}

impl Sampler {
    pub fn new(
        devices: &DeviceSet,
        history: Box<dyn HistorySink>,
        live: LivePublisher,
        stats: Arc<TickStats>,
        period: Duration,
    ) -> AppResult<Self> {
        let (events_tx, events) = mpsc::channel();
        let workers = devices
            .iter()
            .enumerate()
            .map(|(idx, device)| Worker::spawn(idx, Arc::clone(device), events_tx.clone()))
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self {
            workers,
            events,
            history,
            live,
            stats,
            period,
            started: Instant::now(),
            tick: 0,
            last_time: None,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn stats(&self) -> &Arc<TickStats> {
        &self.stats
    }

    /// Wall-clock tick time, never earlier than the previous tick's.
    fn tick_time(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let time = match self.last_time {
            Some(last) if now < last => {
                warn!(%now, %last, "Wall clock stepped backwards; holding tick time");
                last
            }
            _ => now,
        };
        self.last_time = Some(time);
        time
    }

    /// Record a worker event against the tick being collected.
    fn absorb(&mut self, event: WorkerEvent, collecting: &mut [Collecting]) {
        match event {
            WorkerEvent::Reading {
                device_idx,
                channel_idx,
                reading,
            } => {
                let c = &mut collecting[device_idx];
                // Later readings of the same channel replace earlier ones.
                c.slots[channel_idx] = Some(reading);
                if c.complete() {
                    c.open = false;
                }
            }
            WorkerEvent::SweepDone { device_idx, job } => {
                let worker = &mut self.workers[device_idx];
                if worker.job != Some(job) {
                    return;
                }
                worker.job = None;
                let c = &mut collecting[device_idx];
                if c.open {
                    // Nothing more is coming for this tick.
                    c.open = false;
                    fill_missing(
                        &mut c.slots,
                        &worker.device.channels,
                        |_| FailureReason::Busy,
                        Utc::now(),
                    );
                }
            }
        }
    }

    /// Poll every device once and build the snapshot. Nothing is published.
    pub fn tick(&mut self) -> Snapshot {
        self.tick += 1;
        let tick = self.tick;
        let tick_start = Instant::now();
        let time = self.tick_time();
        let elapsed_s = self.started.elapsed().as_secs_f64();

        let mut collecting: Vec<Collecting> = self
            .workers
            .iter()
            .map(|w| Collecting {
                slots: vec![None; w.device.channels.len()],
                deadline: tick_start + w.device.sweep_budget().min(self.period),
                open: false,
            })
            .collect();

        // Readings that arrived since the last snapshot belong to this one.
        while let Ok(event) = self.events.try_recv() {
            self.absorb(event, &mut collecting);
        }

        for (idx, worker) in self.workers.iter_mut().enumerate() {
            let c = &mut collecting[idx];
            c.open = true;
            if worker.job.is_some() {
                debug!(device = %worker.device.name, tick, "Device still sweeping; no new job");
            } else if worker.jobs.send(ReadJob { tick }).is_ok() {
                worker.job = Some(tick);
            } else {
                // Worker thread is gone; nothing will ever answer.
                c.open = false;
                fill_missing(
                    &mut c.slots,
                    &worker.device.channels,
                    |_| FailureReason::Unreachable,
                    time,
                );
            }
            if c.complete() {
                c.open = false;
            }
        }

        loop {
            let now = Instant::now();
            for (worker, c) in self.workers.iter().zip(collecting.iter_mut()) {
                if c.open && c.deadline <= now {
                    c.open = false;
                    let missed = fill_missing(
                        &mut c.slots,
                        &worker.device.channels,
                        |idx| worker.pending_reason(idx),
                        Utc::now(),
                    );
                    debug!(device = %worker.device.name, tick, missed, "Collection deadline passed");
                }
            }
            let next = collecting
                .iter()
                .filter(|c| c.open)
                .map(|c| c.deadline)
                .min();
            let Some(next) = next else {
                break;
            };

            match self.events.recv_timeout(next.saturating_duration_since(now)) {
                Ok(event) => self.absorb(event, &mut collecting),
                Err(RecvTimeoutError::Timeout) => {}
                // Every worker thread has exited.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let devices = self
            .workers
            .iter()
            .zip(collecting)
            .map(|(worker, mut c)| {
                let device = &worker.device;
                fill_missing(
                    &mut c.slots,
                    &device.channels,
                    |_| FailureReason::Unreachable,
                    Utc::now(),
                );
                DeviceReadings {
                    device: device.name.clone(),
                    channels: c.slots.into_iter().flatten().collect(),
                }
            })
            .collect();

        Snapshot {
            tick,
            time,
            elapsed_s,
            devices,
        }
    }

    /// One full cycle: poll, persist, publish.
    pub fn run_once(&mut self) -> u64 {
        let started = Instant::now();
        let snapshot = self.tick();
        let failed = snapshot.failed_count();

        if let Err(e) = self.history.append(&snapshot) {
            warn!(tick = snapshot.tick, error = %e, "History append failed; continuing");
            self.stats.record_history_failure();
        }

        let tick = snapshot.tick;
        self.live.publish(snapshot);
        self.stats.record_tick(started.elapsed(), failed);
        debug!(tick, failed, elapsed_ms = started.elapsed().as_millis() as u64, "Tick complete");
        tick
    }

    /// Tick on a fixed period until `stop` fires or its sender is dropped.
    ///
    /// A tick that overruns its period is followed immediately by the next
    /// one; missed ticks are not replayed.
    pub fn run(mut self, stop: &Receiver<()>) {
        info!(
            devices = self.workers.len(),
            period_s = self.period.as_secs_f64(),
            "Sampler started"
        );
        let mut next = Instant::now();
        loop {
            self.run_once();

            next += self.period;
            let now = Instant::now();
            if now > next {
                self.stats.record_overrun();
                debug!(
                    late_ms = (now - next).as_millis() as u64,
                    "Tick overran its period"
                );
                next = now;
            }

            match stop.recv_timeout(next.saturating_duration_since(now)) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!(ticks = self.tick, "Sampler stopped");
    }

    /// Move the loop onto its own thread.
    pub fn spawn(self, stop: Receiver<()>) -> AppResult<JoinHandle<()>> {
        thread::Builder::new()
            .name("sampler".to_string())
            .spawn(move || self.run(&stop))
            .map_err(|source| AppError::Spawn {
                what: "sampler",
                source,
            })
    }
}

/// Mark every empty slot with `reason(channel_idx)`; returns how many were
/// filled.
fn fill_missing(
    slots: &mut [Option<ChannelReading>],
    channels: &[String],
    reason: impl Fn(usize) -> FailureReason,
    at: DateTime<Utc>,
) -> usize {
    let mut filled = 0;
    for (idx, (slot, channel)) in slots.iter_mut().zip(channels).enumerate() {
        if slot.is_none() {
            *slot = Some(ChannelReading::failed(channel.clone(), reason(idx), at));
            filled += 1;
        }
    }
    filled
}
