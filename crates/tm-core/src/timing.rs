//! Tick timing statistics.
//!
//! Counters are plain atomics so the sampler thread can record while any
//! number of readers take a [`TickStatsSummary`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Accumulating counters for the sampling loop.
#[derive(Debug, Default)]
pub struct TickStats {
    ticks: AtomicU64,
    overruns: AtomicU64,
    failed_channels: AtomicU64,
    history_failures: AtomicU64,
    total_ns: AtomicU64,
    last_ns: AtomicU64,
}

/// Point-in-time copy of [`TickStats`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TickStatsSummary {
    pub ticks: u64,
    pub overruns: u64,
    pub failed_channels: u64,
    pub history_failures: u64,
    pub last_tick_s: f64,
    pub average_tick_s: f64,
}

impl TickStats {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            failed_channels: AtomicU64::new(0),
            history_failures: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            last_ns: AtomicU64::new(0),
        }
    }

    /// Record one completed tick.
    pub fn record_tick(&self, duration: Duration, failed_channels: usize) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(nanos, Ordering::Relaxed);
        self.last_ns.store(nanos, Ordering::Relaxed);
        self.failed_channels
            .fetch_add(failed_channels as u64, Ordering::Relaxed);
    }

    /// A tick ran past its period and the next one started late.
    pub fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_history_failure(&self) {
        self.history_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> TickStatsSummary {
        let ticks = self.ticks();
        let total_s = self.total_ns.load(Ordering::Relaxed) as f64 / 1e9;
        TickStatsSummary {
            ticks,
            overruns: self.overruns.load(Ordering::Relaxed),
            failed_channels: self.failed_channels.load(Ordering::Relaxed),
            history_failures: self.history_failures.load(Ordering::Relaxed),
            last_tick_s: self.last_ns.load(Ordering::Relaxed) as f64 / 1e9,
            average_tick_s: if ticks > 0 { total_s / ticks as f64 } else { 0.0 },
        }
    }
}
