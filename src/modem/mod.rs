//! # ESP8266 Modem Module
//!
//! Talks to an ESP-01 running the stock AT firmware over a serial line.
//!
//! This module handles:
//! - Accumulating the response stream into lines
//! - Classifying response lines into protocol tokens
//! - Building AT commands and the HTTP request in fixed-capacity buffers
//! - The non-blocking protocol state machine that delivers one record per
//!   TCP session

pub mod driver;
pub mod lines;
pub mod port;
pub mod request;
pub mod response;
pub mod serial;

pub use driver::{DriverSettings, ModemDriver};
pub use lines::LineBuffer;
pub use port::ModemPort;
pub use response::Token;
pub use serial::TokioSerialPort;
