//! End-to-end properties of the running monitor.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tm_app::{
    AppError, CommandChannel, CommandError, Device, DeviceSet, Holder, Monitor, TokenState,
    parse_config,
};
use tm_core::{FailureReason, Snapshot, Temperature, k};
use tm_devices::{
    ConfiguredDiscovery, DeviceCommand, DeviceCommandResult, DeviceHandle, DiscoveredDevice,
    Discovery, DiscoveryResult, ReadError, ReadResult,
};
use tm_history::{HistorySink, MemorySink, WriteError, load_records};

/// Scripted handle: per-channel outcome, fixed latency, and an overlap
/// detector shared by every call on the same instrument.
struct Scripted {
    channels: Vec<(&'static str, Option<f64>)>,
    latency: Duration,
    active: Arc<AtomicUsize>,
    overlaps: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(channels: Vec<(&'static str, Option<f64>)>, latency_ms: u64) -> Self {
        Self {
            channels,
            latency: Duration::from_millis(latency_ms),
            active: Arc::new(AtomicUsize::new(0)),
            overlaps: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn busy_for(&self, d: Duration) {
        if self.active.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        thread::sleep(d);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn into_device(self, name: &str, read_timeout_ms: u64) -> Device {
        let channels = self.channels.iter().map(|(c, _)| c.to_string()).collect();
        Device::new(
            name,
            channels,
            Duration::from_millis(read_timeout_ms),
            Box::new(self),
        )
    }
}

impl DeviceHandle for Scripted {
    fn read_channel(&mut self, channel: &str, timeout: Duration) -> ReadResult<Temperature> {
        if self.latency > timeout {
            thread::sleep(timeout);
            return Err(ReadError::Timeout);
        }
        self.busy_for(self.latency);
        match self.channels.iter().find(|(c, _)| *c == channel) {
            Some((_, Some(v))) => Ok(k(*v)),
            _ => Err(ReadError::Unreachable(format!("{channel} dead"))),
        }
    }

    fn apply_command(&mut self, _: &DeviceCommand, _: Duration) -> DeviceCommandResult<String> {
        self.busy_for(self.latency);
        Ok("OK".to_string())
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

fn config(period_ms: u64) -> tm_app::MonitorConfig {
    let mut config = parse_config("devices: []").unwrap();
    config.sample_period_s = period_ms as f64 / 1000.0;
    config.commands.timeout_s = 2.0;
    config
}

#[test]
fn scenario_live_shows_failure_history_skips_it() {
    let sink = MemorySink::new();
    let devices = DeviceSet::new(vec![
        Scripted::new(vec![("c1", Some(10.0)), ("c2", None)], 0).into_device("D", 200),
    ]);
    let mut monitor = Monitor::start_with(&config(10_000), devices, Box::new(sink.clone())).unwrap();
    assert!(monitor.wait_for_ticks(1, Duration::from_secs(5)));

    let snap = monitor.snapshot();
    assert_eq!(snap.tick, 1);
    assert_eq!(snap.kelvin("D", "c1"), Some(10.0));
    assert_eq!(
        snap.get("D", "c2").unwrap().failure(),
        Some(FailureReason::Unreachable)
    );

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(
        (records[0].time, records[0].device.as_str(), records[0].channel.as_str(), records[0].value_k),
        (snap.time, "D", "c1", 10.0)
    );
    monitor.shutdown();
}

#[test]
fn every_snapshot_has_one_entry_per_channel() {
    let devices = DeviceSet::new(vec![
        Scripted::new(vec![("a", Some(1.0)), ("b", None), ("c", Some(3.0))], 1).into_device("X", 100),
        Scripted::new(vec![("a", Some(4.0))], 500).into_device("Y", 50),
    ]);
    let mut monitor = Monitor::start_with(&config(30), devices, Box::new(MemorySink::new())).unwrap();

    let mut seen = 0;
    let deadline = Instant::now() + Duration::from_secs(3);
    while seen < 5 && Instant::now() < deadline {
        let snap = monitor.snapshot();
        if snap.tick > 0 {
            assert_eq!(snap.entry_count(), 4);
            let names: Vec<_> = snap.readings().map(|(d, r)| format!("{d}.{}", r.channel)).collect();
            assert_eq!(names, ["X.a", "X.b", "X.c", "Y.a"]);
            seen += 1;
        }
        thread::sleep(Duration::from_millis(15));
    }
    assert_eq!(seen, 5);
    monitor.shutdown();
}

#[test]
fn stuck_device_does_not_stall_the_others() {
    let devices = DeviceSet::new(vec![
        // Every read blocks for its full timeout.
        Scripted::new(vec![("a", Some(1.0)), ("b", Some(1.0))], 10_000).into_device("Stuck", 400),
        Scripted::new(vec![("a", Some(2.0))], 1).into_device("Fine", 100),
    ]);
    let period = 100;
    let mut monitor =
        Monitor::start_with(&config(period), devices, Box::new(MemorySink::new())).unwrap();

    let started = Instant::now();
    assert!(monitor.wait_for_ticks(10, Duration::from_secs(10)));
    // Ten ticks on a 100 ms period, far below the stuck device's 800 ms sweep.
    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());

    let snap = monitor.snapshot();
    assert_eq!(snap.kelvin("Fine", "a"), Some(2.0));
    let stuck = snap.get("Stuck", "a").unwrap().failure();
    assert!(
        matches!(stuck, Some(FailureReason::Timeout | FailureReason::Busy)),
        "{stuck:?}"
    );
    monitor.shutdown();
}

#[test]
fn commands_and_reads_never_overlap() {
    let handle = Scripted::new(vec![("a", Some(1.0)), ("b", Some(2.0))], 5);
    let overlaps = Arc::clone(&handle.overlaps);
    let devices = DeviceSet::new(vec![handle.into_device("D", 100)]);
    let mut monitor = Monitor::start_with(&config(10), devices, Box::new(MemorySink::new())).unwrap();

    let setpoint = DeviceCommand::parse_shorthand("setpoint=77").unwrap();
    let clients: Vec<_> = (0..4)
        .map(|_| {
            let commands = monitor.commands().clone();
            let setpoint = setpoint.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    commands.apply("D", &setpoint).unwrap();
                }
            })
        })
        .collect();
    for c in clients {
        c.join().unwrap();
    }
    assert!(monitor.wait_for_ticks(3, Duration::from_secs(5)));
    monitor.shutdown();
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn command_waits_for_sampler_then_completes_or_times_out() {
    let devices = Arc::new(DeviceSet::new(vec![
        Scripted::new(vec![("a", Some(1.0))], 0).into_device("D", 100),
    ]));
    let device = Arc::clone(devices.get("D").unwrap());
    let setpoint = DeviceCommand::parse_shorthand("setpoint=77").unwrap();

    // Sampler holds the device longer than the command is willing to wait.
    let patient = CommandChannel::new(Arc::clone(&devices), Duration::from_secs(2));
    let impatient = CommandChannel::new(Arc::clone(&devices), Duration::from_millis(50));

    let guard = device.token.acquire(Holder::Sampler);
    assert_eq!(device.token.state(), TokenState::Held(Holder::Sampler));

    let started = Instant::now();
    assert_eq!(
        impatient.apply("D", &setpoint).unwrap_err(),
        CommandError::DeviceTimeout { device: "D".into() }
    );
    assert!(started.elapsed() >= Duration::from_millis(50));

    let waiter = {
        let setpoint = setpoint.clone();
        thread::spawn(move || patient.apply("D", &setpoint))
    };
    let deadline = Instant::now() + Duration::from_secs(5);
    while device.token.queue_len() == 0 {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(1));
    }
    thread::sleep(Duration::from_millis(50));
    assert!(!waiter.is_finished());

    drop(guard);
    let ack = waiter.join().unwrap().unwrap();
    assert_eq!(ack.reply, "OK");
    assert_eq!(device.token.state(), TokenState::Idle);
}

/// Kills the sampler thread on its first append.
struct Exploding;

impl HistorySink for Exploding {
    fn append(&mut self, _: &Snapshot) -> Result<(), WriteError> {
        panic!("history sink exploded");
    }
}

#[test]
fn waiting_on_a_dead_sampler_returns_early() {
    let devices = DeviceSet::new(vec![
        Scripted::new(vec![("a", Some(1.0))], 0).into_device("D", 100),
    ]);
    let mut monitor = Monitor::start_with(&config(20), devices, Box::new(Exploding)).unwrap();

    let started = Instant::now();
    assert!(!monitor.wait_for_ticks(5, Duration::from_secs(10)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!monitor.is_running());
    assert_eq!(monitor.stats().ticks, 0);
    monitor.shutdown();
}

#[test]
fn healthy_monitor_reports_running_until_shutdown() {
    let devices = DeviceSet::new(vec![
        Scripted::new(vec![("a", Some(1.0))], 0).into_device("D", 100),
    ]);
    let mut monitor = Monitor::start_with(&config(20), devices, Box::new(MemorySink::new())).unwrap();
    assert!(monitor.wait_for_ticks(2, Duration::from_secs(5)));
    assert!(monitor.is_running());
    monitor.shutdown();
    assert!(!monitor.is_running());
}

struct Nothing;

impl Discovery for Nothing {
    fn discover(&self) -> DiscoveryResult<Vec<DiscoveredDevice>> {
        Ok(Vec::new())
    }
}

#[test]
fn no_devices_is_reported() {
    assert!(matches!(
        Monitor::start(&config(100), &Nothing),
        Err(AppError::NoDevices)
    ));
}

#[test]
fn simulated_run_writes_ordered_history() {
    let dir = std::env::temp_dir().join(format!("tm_app_monitor_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    let yaml = format!(
        r#"
sample_period_s: 0.1
history:
  dir: {}
devices:
  - name: Fridge
    family: simulated
    channels: [A, B]
    read_timeout_s: 0.2
    connection: {{type: simulated, latency_ms: 1}}
  - name: Bench
    family: simulated
    channels: [X]
    read_timeout_s: 0.2
    connection: {{type: simulated, latency_ms: 1, failing_channels: [X]}}
"#,
        dir.display()
    );
    let config = parse_config(&yaml).unwrap();
    let discovery = ConfiguredDiscovery::new(config.devices.clone());
    let mut monitor = Monitor::start(&config, &discovery).unwrap();
    assert!(monitor.wait_for_ticks(5, Duration::from_secs(10)));
    monitor.shutdown();

    let path = monitor.history_path().unwrap().to_path_buf();
    let records = load_records(&path).unwrap();
    let ticks = monitor.stats().ticks as usize;
    assert_eq!(records.len(), ticks * 2);
    assert!(records.iter().all(|r| r.device == "Fridge"));
    for pair in records.windows(2) {
        assert!(pair[0].time <= pair[1].time);
    }

    let _ = std::fs::remove_dir_all(&dir);
}
