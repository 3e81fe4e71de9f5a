//! # AT Commands and HTTP Payload
//!
//! Builds every line written to the modem in fixed-capacity buffers.
//! Formatting into a full buffer is reported as
//! [`UplinkError::BufferOverflow`] rather than truncated.

use core::fmt::Write;

use crate::config::{EndpointConfig, WifiConfig};
use crate::error::{Result, UplinkError};
use crate::storage::Record;

/// Capacity of a single AT command line
pub const COMMAND_CAPACITY: usize = 192;

/// Capacity of the HTTP request sent after the data prompt
pub const PAYLOAD_CAPACITY: usize = 384;

/// Largest length the ESP8266 accepts in `AT+CIPSEND`
pub const CIPSEND_MAX: usize = 2048;

pub type Command = heapless::String<COMMAND_CAPACITY>;
pub type Payload = heapless::String<PAYLOAD_CAPACITY>;

/// Liveness probe and wake command
pub const AT_PROBE: &str = "AT\r\n";

/// Station mode
pub const AT_STATION_MODE: &str = "AT+CWMODE=1\r\n";

/// `AT+CWJAP="<ssid>","<password>"`
pub fn join_command(wifi: &WifiConfig) -> Result<Command> {
    let mut cmd = Command::new();
    cmd.push_str("AT+CWJAP=\"").map_err(|_| overflow("join command"))?;
    push_escaped(&mut cmd, &wifi.ssid)?;
    cmd.push_str("\",\"").map_err(|_| overflow("join command"))?;
    push_escaped(&mut cmd, &wifi.password)?;
    cmd.push_str("\"\r\n").map_err(|_| overflow("join command"))?;
    Ok(cmd)
}

/// `AT+CIPSTART="TCP","<host>",<port>`
pub fn connect_command(endpoint: &EndpointConfig) -> Result<Command> {
    let mut cmd = Command::new();
    write!(cmd, "AT+CIPSTART=\"TCP\",\"{}\",{}\r\n", endpoint.host, endpoint.port)
        .map_err(|_| overflow("connect command"))?;
    Ok(cmd)
}

/// `AT+CIPSEND=<len>`
pub fn send_length_command(len: usize) -> Result<Command> {
    if len == 0 || len > CIPSEND_MAX {
        return Err(UplinkError::PayloadLength {
            declared: len,
            actual: len,
        });
    }

    let mut cmd = Command::new();
    write!(cmd, "AT+CIPSEND={}\r\n", len).map_err(|_| overflow("send length command"))?;
    Ok(cmd)
}

/// HTTP GET that reports one record
///
/// `GET <path>?api_key=<key>&field1=<duration>[&field2=<timestamp>] HTTP/1.1`
/// with `Host` and `Connection: close` headers.
pub fn build_payload(endpoint: &EndpointConfig, record: &Record) -> Result<Payload> {
    let mut payload = Payload::new();
    write!(
        payload,
        "GET {}?api_key={}&field1={}",
        endpoint.path, endpoint.api_key, record.duration
    )
    .map_err(|_| overflow("request payload"))?;

    if endpoint.include_timestamp {
        write!(payload, "&field2={}", record.timestamp).map_err(|_| overflow("request payload"))?;
    }

    write!(
        payload,
        " HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        endpoint.host
    )
    .map_err(|_| overflow("request payload"))?;

    Ok(payload)
}

fn overflow(what: &'static str) -> UplinkError {
    UplinkError::BufferOverflow(what)
}

// AT string arguments escape `"`, `,` and `\` with a backslash
fn push_escaped(cmd: &mut Command, value: &str) -> Result<()> {
    for c in value.chars() {
        if matches!(c, '"' | ',' | '\\') {
            cmd.push('\\').map_err(|_| overflow("join command"))?;
        }
        cmd.push(c).map_err(|_| overflow("join command"))?;
    }
    Ok(())
}
