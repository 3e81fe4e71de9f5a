//! # Modem Serial Port
//!
//! Opens the UART the ESP-01 is attached to.
//!
//! This module handles:
//! - Opening the configured port at the configured baud rate (8N1, no flow control)
//! - Falling back to common adapter paths when the configured one is missing
//! - Bounded, non-blocking-per-tick reads
//! - Power switching through the DTR line when wired that way

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt};
use tracing::{debug, info, warn};

use super::port::ModemPort;
use crate::config::{PowerControl, SerialConfig};
use crate::error::{Result, UplinkError};

/// Fallback device paths tried after the configured one (in order of preference)
const FALLBACK_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyUSB0", // USB-to-serial adapters (CH340, CP2102)
    "/dev/ttyAMA0", // Raspberry Pi primary UART
    "/dev/serial0", // Raspberry Pi UART alias
];

/// ESP-01 attached through a tokio serial stream
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
    device_path: String,
    read_window: Duration,
    power_control: PowerControl,
}

impl std::fmt::Debug for TokioSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioSerialPort")
            .field("device_path", &self.device_path)
            .field("read_window", &self.read_window)
            .field("power_control", &self.power_control)
            .finish_non_exhaustive()
    }
}

impl TokioSerialPort {
    /// Open the modem port described by `config`
    ///
    /// Tries `config.port` first, then the fallback paths.
    ///
    /// # Errors
    ///
    /// Returns [`UplinkError::SerialPortNotFound`] if no candidate opens.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use motion_uplink::config::SerialConfig;
    /// use motion_uplink::modem::serial::TokioSerialPort;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let port = TokioSerialPort::open(&SerialConfig::default())?;
    ///     println!("Modem on {}", port.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let mut paths: Vec<&str> = vec![config.port.as_str()];
        for path in FALLBACK_DEVICE_PATHS {
            if !paths.contains(path) {
                paths.push(path);
            }
        }
        Self::open_with_paths(&paths, config)
    }

    /// Open the first of `paths` that succeeds
    pub fn open_with_paths(paths: &[&str], config: &SerialConfig) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, config.baud_rate) {
                Ok(port) => {
                    info!("Opened modem serial port {} at {} baud", path, config.baud_rate);
                    return Ok(Self {
                        port,
                        device_path: path.to_string(),
                        read_window: Duration::from_millis(config.timeout_ms),
                        power_control: config.power_control,
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(UplinkError::SerialPortNotFound(paths.join(", ")))
    }

    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        // Must be created inside a tokio runtime
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| UplinkError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

#[async_trait]
impl ModemPort for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.port.flush().await
    }

    async fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match tokio::time::timeout(self.read_window, self.port.read(buf)).await {
            Ok(result) => result,
            // Nothing arrived within the window
            Err(_) => Ok(0),
        }
    }

    fn set_power(&mut self, on: bool) -> io::Result<()> {
        match self.power_control {
            PowerControl::None => Ok(()),
            PowerControl::Dtr => self
                .port
                .write_data_terminal_ready(on)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
        }
    }
}
