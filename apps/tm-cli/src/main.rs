use clap::{Parser, Subcommand};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tm_app::{AppError, AppResult, Monitor, Reply, Request, Response, load_config};
use tm_core::{ReadingValue, Snapshot};
use tm_devices::{ConfiguredDiscovery, DeviceCommand, list_ports};
use tracing::Level;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "tm-cli")]
#[command(about = "tempmon - Laboratory temperature monitor", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start monitoring the configured devices
    Run {
        /// Path to the monitor YAML file
        config_path: PathBuf,
        /// Stop after this many ticks (default: run until stdin closes or `quit`)
        #[arg(long)]
        ticks: Option<u64>,
    },
    /// Validate a config file and list its devices
    Check {
        /// Path to the monitor YAML file
        config_path: PathBuf,
    },
    /// List serial ports with their USB descriptors
    Ports,
    /// Print the latest readings from a running monitor
    Live {
        /// Control server address, e.g. 127.0.0.1:8084
        addr: String,
    },
    /// Send a command to a device on a running monitor
    Send {
        /// Control server address
        addr: String,
        /// Device name
        device: String,
        /// Command shorthand, e.g. setpoint=77 or heater@2=off
        command: String,
    },
}

fn main() -> AppResult<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Run { config_path, ticks } => cmd_run(&config_path, ticks),
        Commands::Check { config_path } => cmd_check(&config_path),
        Commands::Ports => cmd_ports(),
        Commands::Live { addr } => cmd_live(&addr),
        Commands::Send {
            addr,
            device,
            command,
        } => cmd_send(&addr, &device, &command),
    }
}

fn cmd_run(config_path: &Path, ticks: Option<u64>) -> AppResult<()> {
    let config = load_config(config_path)?;
    let discovery = ConfiguredDiscovery::new(config.devices.clone());

    let mut monitor = match Monitor::start(&config, &discovery) {
        Ok(monitor) => monitor,
        Err(AppError::NoDevices) => {
            println!("No devices found. Exiting.");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    println!(
        "Monitoring {} device(s) every {:.3} s",
        monitor.devices().len(),
        config.sample_period_s
    );
    if let Some(path) = monitor.history_path() {
        println!("  History: {}", path.display());
    }
    if let Some(addr) = monitor.server_addr() {
        println!("  Control server: {}", addr);
    }

    match ticks {
        Some(n) => {
            while !monitor.wait_for_ticks(n, Duration::from_secs(60)) {
                if !monitor.is_running() {
                    return Err(AppError::SamplerStopped {
                        ticks: monitor.stats().ticks,
                    });
                }
            }
            print_snapshot(&monitor.snapshot());
        }
        None => console(&monitor)?,
    }

    monitor.shutdown();
    let stats = monitor.stats();
    println!(
        "✓ Stopped after {} ticks ({} overruns, {} failed readings, {} history failures)",
        stats.ticks, stats.overruns, stats.failed_channels, stats.history_failures
    );
    Ok(())
}

/// Operator console on stdin: `status`, `<device> <name=value>`, `quit`.
fn console(monitor: &Monitor) -> AppResult<()> {
    println!("Type `status`, `<device> <command>` or `quit`.");
    for line in io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        match line {
            "" => {}
            "quit" | "exit" => break,
            "status" => print_snapshot(&monitor.snapshot()),
            _ => {
                let Some((device, shorthand)) = line.split_once(char::is_whitespace) else {
                    println!("✗ Expected `<device> <command>`");
                    continue;
                };
                let result = DeviceCommand::parse_shorthand(shorthand.trim())
                    .map_err(tm_app::CommandError::from)
                    .and_then(|cmd| monitor.commands().apply(device, &cmd));
                match result {
                    Ok(ack) => println!("✓ {} {} {}", ack.device, ack.command, ack.reply),
                    Err(e) => println!("✗ {}", e),
                }
            }
        }
    }
    Ok(())
}

fn cmd_check(config_path: &Path) -> AppResult<()> {
    println!("Validating config: {}", config_path.display());
    let config = load_config(config_path)?;
    println!("✓ Config is valid");
    println!("  Sample period: {:.3} s", config.sample_period_s);
    println!("  History dir: {}", config.history.dir.display());

    if config.devices.is_empty() {
        println!("No devices configured");
    } else {
        println!("Devices:");
        for dev in &config.devices {
            println!(
                "  {} - {} ({} channels: {})",
                dev.name,
                dev.family.label(),
                dev.channels.len(),
                dev.channels.join(", ")
            );
        }
    }
    Ok(())
}

fn cmd_ports() -> AppResult<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in ports {
        if port.usb {
            println!(
                "  {} - {} / {} (serial {})",
                port.port_name,
                port.manufacturer.as_deref().unwrap_or("?"),
                port.product.as_deref().unwrap_or("?"),
                port.serial_number.as_deref().unwrap_or("?")
            );
        } else {
            println!("  {}", port.port_name);
        }
    }
    Ok(())
}

fn cmd_live(addr: &str) -> AppResult<()> {
    match tm_app::request(addr, &Request::Live, CLIENT_TIMEOUT)? {
        Response::Ok {
            body: Reply::Live(snapshot),
        } => print_snapshot(&snapshot),
        other => print_unexpected(other),
    }
    Ok(())
}

fn cmd_send(addr: &str, device: &str, shorthand: &str) -> AppResult<()> {
    let command = match DeviceCommand::parse_shorthand(shorthand) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("✗ {}", e);
            std::process::exit(2);
        }
    };
    match tm_app::request(addr, &Request::command(device, &command), CLIENT_TIMEOUT)? {
        Response::Ok {
            body: Reply::Ack(ack),
        } => println!("✓ {} {} {}", ack.device, ack.command, ack.reply),
        other => print_unexpected(other),
    }
    Ok(())
}

fn print_unexpected(response: Response) {
    match response {
        Response::Error { kind, message } => {
            eprintln!("✗ {}: {}", kind, message);
            std::process::exit(1);
        }
        Response::Ok { body } => {
            let text = serde_json::to_string_pretty(&body).unwrap_or_default();
            println!("{}", text);
        }
    }
}

fn print_snapshot(snapshot: &Snapshot) {
    if snapshot.tick == 0 {
        println!("No readings yet");
        return;
    }
    println!("Tick {} at {}", snapshot.tick, snapshot.time.to_rfc3339());
    for dev in &snapshot.devices {
        println!("  {}", dev.device);
        for reading in &dev.channels {
            match reading.value {
                ReadingValue::Ok { kelvin } => println!("    {:<12} {:>10.3} K", reading.channel, kelvin),
                ReadingValue::Failed { reason } => {
                    println!("    {:<12} {:>10}", reading.channel, reason.label())
                }
            }
        }
    }
}
