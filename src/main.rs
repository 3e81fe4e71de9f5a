//! # Motion Uplink
//!
//! Deliver motion events from a persistent buffer through an ESP8266 modem.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration (first argument, default `config/default.toml`)
//!    - Set up logging, optionally with daily-rotated files
//!    - Open the modem serial port and the storage image
//!    - Power the modem on
//!
//! 2. **Main Loop**
//!    - Tick the uplink every `tick_interval_ms`
//!    - Execute operator commands read from stdin
//!    - Handle Ctrl+C for graceful shutdown
//!
//! 3. **Graceful Shutdown**
//!    - Power the modem off; queued records stay in the storage image
//!
//! # Examples
//!
//! ```bash
//! cargo run --release -- config/default.toml
//! ```
//!
//! ```text
//! INFO motion_uplink: Motion Uplink v0.1.0 starting...
//! INFO motion_uplink::modem::serial: Opened modem serial port /dev/ttyUSB0 at 4800 baud
//! INFO motion_uplink::modem::driver: Modem Off -> Booting
//! ```

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use motion_uplink::config::{Config, LoggingConfig};
use motion_uplink::modem::{DriverSettings, ModemDriver, ModemPort, TokioSerialPort};
use motion_uplink::storage::{Eeprom, FileEeprom, PersistentRing};
use motion_uplink::uplink::Uplink;

/// Configuration file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix for rotated log files
const LOG_FILE_PREFIX: &str = "motion-uplink.log";

const HELP: &str = "\
commands:
  on           power the modem on
  off          power the modem off
  send         send the oldest record now, skipping the rate limit
  status       print the status register as JSON
  list         print queued records, oldest first
  motion <ms>  queue a motion event of the given duration
  help         show this text";

/// Operator command read from stdin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    On,
    Off,
    Send,
    Status,
    List,
    Motion(u32),
    Help,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let command = match words.next()? {
        "on" => Command::On,
        "off" => Command::Off,
        "send" => Command::Send,
        "status" => Command::Status,
        "list" => Command::List,
        "motion" => Command::Motion(words.next()?.parse().ok()?),
        "help" => Command::Help,
        _ => return None,
    };

    // Trailing words make the command ambiguous
    match words.next() {
        Some(_) => None,
        None => Some(command),
    }
}

fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());

    if config.dir.is_empty() {
        registry.init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&config.dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    registry
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    Some(guard)
}

/// Run one operator command
///
/// Failures are logged; none of them ends the loop.
async fn execute<P: ModemPort, E: Eeprom>(uplink: &mut Uplink<P, E>, command: Command, now: u64) {
    match command {
        Command::On => match uplink.power_on(now).await {
            Ok(true) => {}
            Ok(false) => println!("modem is already powered ({:?})", uplink.modem_state()),
            Err(e) => warn!("Power-on failed: {}", e),
        },
        Command::Off => {
            if let Err(e) = uplink.power_off() {
                warn!("Power-off failed: {}", e);
            }
        }
        Command::Send => uplink.request_immediate_send(),
        Command::Status => println!("{}", uplink.status().to_json()),
        Command::List => {
            for (i, record) in uplink.buffer().records().iter().enumerate() {
                println!("{:2}: {} ms at {}", i, record.duration, record.timestamp);
            }
        }
        Command::Motion(duration) => match uplink.record_motion(duration, unix_seconds()) {
            Ok(true) => {}
            Ok(false) => println!("buffer full, event dropped"),
            Err(e) => warn!("Failed to store motion event: {}", e),
        },
        Command::Help => println!("{}", HELP),
    }
}

/// Wall-clock seconds used as the event timestamp
fn unix_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging);
    info!("Motion Uplink v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path);

    let port = TokioSerialPort::open(&config.serial)?;
    info!("Modem serial port opened at: {}", port.device_path());

    let image = FileEeprom::open(&config.storage.image_path, config.storage.image_size)
        .with_context(|| format!("Failed to open storage image {}", config.storage.image_path))?;
    let buffer = PersistentRing::open(image, config.storage.base_offset, config.storage.capacity)?;
    info!(
        "Storage image {} holds {} queued record(s)",
        config.storage.image_path,
        buffer.len()
    );

    let driver = ModemDriver::new(port, DriverSettings::from_config(&config));
    let mut uplink = Uplink::new(driver, buffer, config.uplink.min_send_interval_ms);

    let start = Instant::now();
    let now = || start.elapsed().as_millis() as u64;

    if let Err(e) = uplink.power_on(now()).await {
        warn!("Power-on failed, retry with 'off' then 'on': {}", e);
    }

    let mut tick_interval = interval(Duration::from_millis(config.uplink.tick_interval_ms));
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    info!("Starting uplink loop, tick every {} ms", config.uplink.tick_interval_ms);
    info!("Type 'help' for commands, Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                // The driver has already dropped to Error; a power cycle recovers
                if let Err(e) = uplink.tick(now()).await {
                    warn!("Uplink tick failed: {}", e);
                }
            }

            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match parse_command(&line) {
                        Some(command) => execute(&mut uplink, command, now()).await,
                        None => println!("unknown command '{}', try 'help'", line.trim()),
                    },
                    Ok(None) => {
                        info!("stdin closed, commands disabled");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("Failed to read command: {}", e);
                        stdin_open = false;
                    }
                }
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    if let Err(e) = uplink.power_off() {
        warn!("Failed to power the modem off: {}", e);
    }
    info!(
        "{} record(s) left queued, {} dropped this run",
        uplink.buffer().len(),
        uplink.status().dropped_count
    );

    Ok(())
}
