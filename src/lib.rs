//! # Motion Uplink Library
//!
//! Queue motion events in a power-safe ring buffer and deliver them one at a
//! time over an ESP8266 WiFi modem.
//!
//! The pieces run cooperatively from a single tick:
//! - [`storage`]: byte-addressable EEPROM image and the persistent ring buffer
//! - [`modem`]: AT-command state machine driving the ESP8266
//! - [`scheduler`]: decides when a send session starts
//! - [`uplink`]: owns everything above plus the shared [`status`]

pub mod config;
pub mod error;
pub mod modem;
pub mod scheduler;
pub mod status;
pub mod storage;
pub mod uplink;
