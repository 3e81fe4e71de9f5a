//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Network credentials and the telemetry endpoint are read once at startup;
//! there is no runtime reconfiguration.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{Result, UplinkError};
use crate::modem::request;
use crate::storage::ring::layout_size;
use crate::storage::Record;

/// Baud rates the ESP-01 AT firmware can be switched to
const SUPPORTED_BAUD_RATES: &[u32] = &[4800, 9600, 19200, 38400, 57600, 74880, 115200];

/// Accepted `[logging] level` values
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    pub wifi: WifiConfig,
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub uplink: UplinkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How the modem's power rail is switched
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PowerControl {
    /// Modem is always powered; power commands only change protocol state
    #[default]
    None,
    /// Modem enable pin is wired to the adapter's DTR line
    Dtr,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Longest time a tick waits for bytes to arrive
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub power_control: PowerControl,
}

/// WiFi credentials
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WifiConfig {
    #[serde(default)]
    pub ssid: String,

    #[serde(default)]
    pub password: String,
}

/// Telemetry endpoint (ThingSpeak-style HTTP update API)
#[derive(Debug, Deserialize, Clone)]
pub struct EndpointConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default)]
    pub api_key: String,

    /// Also report the record timestamp as `field2`
    #[serde(default)]
    pub include_timestamp: bool,
}

/// Protocol timing and scheduling
#[derive(Debug, Deserialize, Clone)]
pub struct UplinkConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_min_send_interval_ms")]
    pub min_send_interval_ms: u64,

    #[serde(default = "default_boot_probe_interval_ms")]
    pub boot_probe_interval_ms: u64,

    // Per-state timeouts; 0 disables the timeout
    #[serde(default = "default_boot_timeout_ms")]
    pub boot_timeout_ms: u64,

    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_prompt_timeout_ms")]
    pub prompt_timeout_ms: u64,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,

    /// Log every modem line at info level instead of debug
    #[serde(default)]
    pub show_raw_responses: bool,
}

/// Persistent ring buffer placement
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_image_path")]
    pub image_path: String,

    #[serde(default = "default_image_size")]
    pub image_size: usize,

    #[serde(default)]
    pub base_offset: usize,

    #[serde(default = "default_capacity")]
    pub capacity: u8,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rotated log files; empty logs to stdout only
    #[serde(default)]
    pub dir: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 4800 }
fn default_timeout_ms() -> u64 { 10 }

fn default_host() -> String { "api.thingspeak.com".to_string() }
fn default_port() -> u16 { 80 }
fn default_path() -> String { "/update".to_string() }

fn default_tick_interval_ms() -> u64 { 50 }
fn default_min_send_interval_ms() -> u64 { 20_000 }
fn default_boot_probe_interval_ms() -> u64 { 2000 }
fn default_boot_timeout_ms() -> u64 { 30_000 }
fn default_join_timeout_ms() -> u64 { 30_000 }
fn default_connect_timeout_ms() -> u64 { 10_000 }
fn default_prompt_timeout_ms() -> u64 { 5000 }
fn default_send_timeout_ms() -> u64 { 10_000 }
fn default_max_line_len() -> usize { 256 }

fn default_image_path() -> String { "./eeprom.bin".to_string() }
fn default_image_size() -> usize { 1024 }
fn default_capacity() -> u8 { 10 }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            power_control: PowerControl::default(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            api_key: String::new(),
            include_timestamp: false,
        }
    }
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            min_send_interval_ms: default_min_send_interval_ms(),
            boot_probe_interval_ms: default_boot_probe_interval_ms(),
            boot_timeout_ms: default_boot_timeout_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            prompt_timeout_ms: default_prompt_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            max_line_len: default_max_line_len(),
            show_raw_responses: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            image_path: default_image_path(),
            image_size: default_image_size(),
            base_offset: 0,
            capacity: default_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: String::new(),
        }
    }
}

fn invalid(msg: impl std::fmt::Display) -> UplinkError {
    UplinkError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use motion_uplink::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {:?}",
                SUPPORTED_BAUD_RATES
            )));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 1000 {
            return Err(invalid("timeout_ms must be between 1 and 1000"));
        }

        // ESP8266 limits: 32-byte SSID, 64-byte passphrase
        if self.wifi.ssid.is_empty() || self.wifi.ssid.len() > 32 {
            return Err(invalid("wifi ssid must be 1 to 32 bytes"));
        }

        if self.wifi.password.len() > 64 {
            return Err(invalid("wifi password must be at most 64 bytes"));
        }

        if self.endpoint.host.is_empty() {
            return Err(invalid("endpoint host cannot be empty"));
        }

        if self.endpoint.port == 0 {
            return Err(invalid("endpoint port cannot be 0"));
        }

        if !self.endpoint.path.starts_with('/') {
            return Err(invalid("endpoint path must start with '/'"));
        }

        if self.endpoint.api_key.is_empty() {
            return Err(invalid("endpoint api_key cannot be empty"));
        }

        // Everything sent to the modem must fit its fixed-capacity buffer
        request::join_command(&self.wifi)
            .map_err(|e| invalid(format!("wifi credentials too long once escaped: {}", e)))?;
        request::connect_command(&self.endpoint)
            .map_err(|e| invalid(format!("endpoint host too long: {}", e)))?;
        request::build_payload(&self.endpoint, &Record::new(u32::MAX, u32::MAX))
            .map_err(|e| invalid(format!("endpoint host, path or api_key too long: {}", e)))?;

        if self.uplink.tick_interval_ms == 0 || self.uplink.tick_interval_ms > 10_000 {
            return Err(invalid("tick_interval_ms must be between 1 and 10000"));
        }

        if self.uplink.boot_probe_interval_ms == 0 || self.uplink.boot_probe_interval_ms > 60_000 {
            return Err(invalid("boot_probe_interval_ms must be between 1 and 60000"));
        }

        if self.uplink.min_send_interval_ms > 86_400_000 {
            return Err(invalid("min_send_interval_ms must be at most one day"));
        }

        if self.uplink.max_line_len < 16 || self.uplink.max_line_len > 4096 {
            return Err(invalid("max_line_len must be between 16 and 4096"));
        }

        if self.storage.image_path.is_empty() {
            return Err(invalid("storage image_path cannot be empty"));
        }

        if self.storage.capacity == 0 {
            return Err(invalid("storage capacity must be greater than 0"));
        }

        let end = self.storage.base_offset + layout_size(self.storage.capacity);
        if end > self.storage.image_size {
            return Err(invalid(format!(
                "ring buffer needs bytes {}..{} but image_size is {}",
                self.storage.base_offset, end, self.storage.image_size
            )));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid(format!("logging level must be one of: {:?}", LOG_LEVELS)));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        serial: SerialConfig::default(),
        wifi: WifiConfig {
            ssid: "home".to_string(),
            password: "secret".to_string(),
        },
        endpoint: EndpointConfig {
            api_key: "KEY123".to_string(),
            ..EndpointConfig::default()
        },
        uplink: UplinkConfig::default(),
        storage: StorageConfig::default(),
        logging: LoggingConfig::default(),
    }
}
