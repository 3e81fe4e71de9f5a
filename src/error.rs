//! # Error Types
//!
//! Custom error types for the motion uplink using `thiserror`.

use thiserror::Error;

/// Main error type for the motion uplink
#[derive(Debug, Error)]
pub enum UplinkError {
    /// Serial port I/O errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate device paths could be opened
    #[error("No modem serial port found (tried: {0})")]
    SerialPortNotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistent storage layout or backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// A fixed-capacity command or payload buffer was too small
    #[error("{0} does not fit its fixed-capacity buffer")]
    BufferOverflow(&'static str),

    /// Declared AT+CIPSEND length disagrees with the payload about to be written
    #[error("Payload length mismatch: declared {declared} bytes, actual {actual} bytes")]
    PayloadLength { declared: usize, actual: usize },
}

/// Result type alias for the motion uplink
pub type Result<T> = std::result::Result<T, UplinkError>;
