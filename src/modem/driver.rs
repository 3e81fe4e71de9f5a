//! # ESP8266 Protocol Driver
//!
//! Non-blocking state machine that powers the modem, joins the network and
//! runs one TCP send session at a time.
//!
//! ## Session
//!
//! ```text
//! Ready --begin_send--> AwaitConnectAck --CONNECT--> AwaitSendPrompt
//!       <--SEND OK/SEND FAIL-- AwaitSendResult <-----------'>'
//! ```
//!
//! Each [`ModemDriver::poll`] reads what the port has buffered, consumes every
//! complete line and then checks the per-state deadline. Nothing here waits
//! for the modem.
//!
//! The record being sent stays at the head of the ring buffer until the modem
//! confirms it with `SEND OK`; only then is it popped. A power-off, timeout or
//! error anywhere in the session leaves it queued for the next attempt.

use std::mem;

use tracing::{debug, error, info, warn};

use super::lines::LineBuffer;
use super::port::ModemPort;
use super::request::{self, Payload, AT_PROBE, AT_STATION_MODE};
use super::response::{classify, Token, PROMPT_MARKER};
use crate::config::{Config, EndpointConfig, WifiConfig};
use crate::error::{Result, UplinkError};
use crate::status::{ModemState, Status};
use crate::storage::{Eeprom, PersistentRing, Record};

/// Bytes requested from the port per read
const READ_CHUNK: usize = 128;

/// Upper bound on reads per poll while the port keeps returning full chunks
const MAX_READS_PER_POLL: usize = 4;

/// Everything the driver needs from the configuration
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub wifi: WifiConfig,
    pub endpoint: EndpointConfig,
    pub boot_probe_interval_ms: u64,
    pub boot_timeout_ms: u64,
    pub join_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub prompt_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub max_line_len: usize,
    pub show_raw_responses: bool,
}

impl DriverSettings {
    pub fn from_config(config: &Config) -> Self {
        let uplink = &config.uplink;
        Self {
            wifi: config.wifi.clone(),
            endpoint: config.endpoint.clone(),
            boot_probe_interval_ms: uplink.boot_probe_interval_ms,
            boot_timeout_ms: uplink.boot_timeout_ms,
            join_timeout_ms: uplink.join_timeout_ms,
            connect_timeout_ms: uplink.connect_timeout_ms,
            prompt_timeout_ms: uplink.prompt_timeout_ms,
            send_timeout_ms: uplink.send_timeout_ms,
            max_line_len: uplink.max_line_len,
            show_raw_responses: uplink.show_raw_responses,
        }
    }
}

/// Internal protocol state with per-state data
#[derive(Debug)]
enum Phase {
    Off,
    Booting {
        since: u64,
        last_probe: u64,
    },
    Associating {
        since: u64,
    },
    Ready,
    AwaitConnectAck {
        since: u64,
        payload: Payload,
    },
    AwaitSendPrompt {
        since: u64,
        payload: Payload,
        declared: usize,
        // CIPSTART on a live link answers ALREADY CONNECTED followed by ERROR
        absorb_error: bool,
    },
    AwaitSendResult {
        since: u64,
    },
    Error,
}

impl Phase {
    fn state(&self) -> ModemState {
        match self {
            Phase::Off => ModemState::Off,
            Phase::Booting { .. } => ModemState::Booting,
            Phase::Associating { .. } => ModemState::Associating,
            Phase::Ready => ModemState::Ready,
            Phase::AwaitConnectAck { .. } => ModemState::AwaitConnectAck,
            Phase::AwaitSendPrompt { .. } => ModemState::AwaitSendPrompt,
            Phase::AwaitSendResult { .. } => ModemState::AwaitSendResult,
            Phase::Error => ModemState::Error,
        }
    }
}

/// ESP8266 AT-command driver
pub struct ModemDriver<P: ModemPort> {
    port: P,
    settings: DriverSettings,
    lines: LineBuffer,
    phase: Phase,
}

impl<P: ModemPort> ModemDriver<P> {
    pub fn new(port: P, settings: DriverSettings) -> Self {
        let lines = LineBuffer::new(settings.max_line_len);
        Self {
            port,
            settings,
            lines,
            phase: Phase::Off,
        }
    }

    pub fn state(&self) -> ModemState {
        self.phase.state()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.phase, Phase::Ready)
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Response lines dropped for exceeding the line bound
    pub fn line_overflows(&self) -> u32 {
        self.lines.overflows()
    }

    /// Power the modem and start probing it
    ///
    /// Only acts from `Off`; returns `Ok(false)` in any other state.
    pub async fn power_on(&mut self, now: u64, status: &mut Status) -> Result<bool> {
        if !matches!(self.phase, Phase::Off) {
            warn!("Power-on ignored, modem is {:?}", self.state());
            return Ok(false);
        }

        self.lines.clear();
        if let Err(e) = self.port.set_power(true) {
            self.enter(Phase::Error, status);
            return Err(UplinkError::Serial(format!("power-on failed: {}", e)));
        }

        info!("Modem powered on");
        self.enter(
            Phase::Booting {
                since: now,
                last_probe: now,
            },
            status,
        );

        if let Err(e) = self.write_line(AT_PROBE).await {
            self.enter(Phase::Error, status);
            return Err(e);
        }
        Ok(true)
    }

    /// Cut power from any state
    ///
    /// An in-flight session is abandoned and its record stays queued.
    pub fn power_off(&mut self, status: &mut Status) -> Result<()> {
        if self.state().in_session() {
            info!("Power-off aborts the send session; record stays queued");
            count_abort(status);
        }

        self.lines.clear();
        self.enter(Phase::Off, status);
        self.port
            .set_power(false)
            .map_err(|e| UplinkError::Serial(format!("power-off failed: {}", e)))
    }

    /// Open a TCP session to deliver `record`
    ///
    /// Only accepted in `Ready`; returns `Ok(false)` otherwise and changes
    /// nothing.
    pub async fn begin_send(&mut self, record: &Record, now: u64, status: &mut Status) -> Result<bool> {
        if !matches!(self.phase, Phase::Ready) {
            debug!("Send rejected, modem is {:?}", self.state());
            return Ok(false);
        }

        let payload = request::build_payload(&self.settings.endpoint, record)?;
        let connect = request::connect_command(&self.settings.endpoint)?;

        if let Err(e) = self.write_line(&connect).await {
            self.enter(Phase::Error, status);
            return Err(e);
        }

        info!(
            "Sending record (duration {} ms, t={}) to {}:{}",
            record.duration, record.timestamp, self.settings.endpoint.host, self.settings.endpoint.port
        );
        self.enter(Phase::AwaitConnectAck { since: now, payload }, status);
        Ok(true)
    }

    /// Consume modem output and advance the state machine
    ///
    /// Pops the oldest record from `buffer` when the modem confirms delivery.
    /// Any failure while reacting moves the driver to `Error` before the
    /// error is returned.
    pub async fn poll<E: Eeprom>(
        &mut self,
        now: u64,
        buffer: &mut PersistentRing<E>,
        status: &mut Status,
    ) -> Result<()> {
        let in_session = self.state().in_session();
        let result = self.poll_inner(now, buffer, status).await;
        if let Err(e) = &result {
            if in_session {
                count_abort(status);
            }
            error!("Modem driver failed: {}", e);
            self.enter(Phase::Error, status);
        }
        result
    }

    async fn poll_inner<E: Eeprom>(
        &mut self,
        now: u64,
        buffer: &mut PersistentRing<E>,
        status: &mut Status,
    ) -> Result<()> {
        self.receive().await?;

        while let Some(line) = self.lines.next_line() {
            self.log_rx(&line);
            for token in classify(&line) {
                self.apply(token, now, buffer, status).await?;
            }
        }

        // The data prompt arrives without a line terminator
        if matches!(self.phase, Phase::AwaitSendPrompt { .. }) {
            if let Some(partial) = self.lines.partial() {
                if partial.ends_with(PROMPT_MARKER) {
                    self.lines.clear();
                    self.log_rx(&partial);
                    self.apply(Token::Prompt, now, buffer, status).await?;
                }
            }
        }

        self.check_deadlines(now, status).await
    }

    async fn receive(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        for _ in 0..MAX_READS_PER_POLL {
            let n = self
                .port
                .read_available(&mut chunk)
                .await
                .map_err(|e| UplinkError::Serial(format!("read failed: {}", e)))?;
            if n > 0 {
                self.lines.extend(&chunk[..n]);
            }
            if n < chunk.len() {
                break;
            }
        }
        Ok(())
    }

    async fn apply<E: Eeprom>(
        &mut self,
        token: Token,
        now: u64,
        buffer: &mut PersistentRing<E>,
        status: &mut Status,
    ) -> Result<()> {
        let from = self.phase.state();
        // A failed step leaves the placeholder, so the driver ends up in Error
        let phase = mem::replace(&mut self.phase, Phase::Error);
        let next = self.step(phase, token, now, buffer, status).await?;
        self.phase = next;
        self.announce(from, status);
        Ok(())
    }

    async fn step<E: Eeprom>(
        &mut self,
        phase: Phase,
        token: Token,
        now: u64,
        buffer: &mut PersistentRing<E>,
        status: &mut Status,
    ) -> Result<Phase> {
        let next = match (phase, token) {
            // Unpowered or faulted: only power control leaves these
            (Phase::Off, _) => Phase::Off,
            (Phase::Error, _) => Phase::Error,

            (
                Phase::AwaitSendPrompt {
                    since,
                    payload,
                    declared,
                    absorb_error: true,
                },
                Token::Error,
            ) => {
                debug!("Ignoring ERROR that follows ALREADY CONNECTED");
                Phase::AwaitSendPrompt {
                    since,
                    payload,
                    declared,
                    absorb_error: false,
                }
            }
            (phase, Token::Error | Token::DnsFail) => {
                if phase.state().in_session() {
                    count_abort(status);
                }
                error!("Modem reported {:?} while {:?}", token, phase.state());
                Phase::Error
            }

            (Phase::Booting { .. }, Token::Ok) => {
                info!("Modem answered, joining network '{}'", self.settings.wifi.ssid);
                self.write_line(AT_STATION_MODE).await?;
                let join = request::join_command(&self.settings.wifi)?;
                self.write_line(&join).await?;
                Phase::Associating { since: now }
            }
            (Phase::Booting { .. } | Phase::Associating { .. }, Token::GotIp) => {
                info!("Network joined");
                Phase::Ready
            }
            (Phase::Associating { .. }, Token::JoinFail) => {
                error!("Failed to join network '{}'", self.settings.wifi.ssid);
                Phase::Error
            }
            (
                phase @ (Phase::Ready
                | Phase::AwaitConnectAck { .. }
                | Phase::AwaitSendPrompt { .. }
                | Phase::AwaitSendResult { .. }),
                Token::WifiDisconnect,
            ) => {
                warn!("Network lost while {:?}", phase.state());
                if phase.state().in_session() {
                    count_abort(status);
                }
                Phase::Associating { since: now }
            }

            (Phase::AwaitConnectAck { payload, .. }, Token::ConnectAck | Token::AlreadyConnected) => {
                let declared = payload.len();
                let cmd = request::send_length_command(declared)?;
                self.write_line(&cmd).await?;
                Phase::AwaitSendPrompt {
                    since: now,
                    payload,
                    declared,
                    absorb_error: token == Token::AlreadyConnected,
                }
            }
            (
                Phase::AwaitSendPrompt {
                    payload, declared, ..
                },
                Token::Prompt,
            ) => {
                if payload.len() != declared {
                    return Err(UplinkError::PayloadLength {
                        declared,
                        actual: payload.len(),
                    });
                }
                self.write_bytes(payload.as_bytes()).await?;
                Phase::AwaitSendResult { since: now }
            }
            (Phase::AwaitSendResult { .. }, Token::SendOk) => {
                if !buffer.pop_oldest()? {
                    warn!("Delivery confirmed but the buffer is already empty");
                }
                status.stored_count = buffer.len();
                status.last_send_ok = true;
                status.last_send_success_time = now;
                info!("Record delivered, {} left in buffer", buffer.len());
                Phase::Ready
            }
            (Phase::AwaitSendResult { .. }, Token::SendFail) => {
                status.last_send_ok = false;
                status.send_failures = status.send_failures.saturating_add(1);
                warn!("Modem reported SEND FAIL, record stays queued");
                Phase::Ready
            }
            (
                phase @ (Phase::AwaitConnectAck { .. }
                | Phase::AwaitSendPrompt { .. }
                | Phase::AwaitSendResult { .. }),
                Token::Closed,
            ) => {
                warn!("Connection closed while {:?}, record stays queued", phase.state());
                count_abort(status);
                Phase::Ready
            }

            (phase, token) => {
                debug!("Ignoring {:?} while {:?}", token, phase.state());
                phase
            }
        };

        Ok(next)
    }

    async fn check_deadlines(&mut self, now: u64, status: &mut Status) -> Result<()> {
        let deadline = match &self.phase {
            Phase::Booting { since, .. } => Some((*since, self.settings.boot_timeout_ms)),
            Phase::Associating { since } => Some((*since, self.settings.join_timeout_ms)),
            Phase::AwaitConnectAck { since, .. } => Some((*since, self.settings.connect_timeout_ms)),
            Phase::AwaitSendPrompt { since, .. } => Some((*since, self.settings.prompt_timeout_ms)),
            Phase::AwaitSendResult { since } => Some((*since, self.settings.send_timeout_ms)),
            Phase::Off | Phase::Ready | Phase::Error => None,
        };

        // Zero disables the deadline
        if let Some((since, limit)) = deadline {
            let elapsed = now.saturating_sub(since);
            if limit > 0 && elapsed >= limit {
                warn!("Modem stuck in {:?} for {} ms", self.state(), elapsed);
                if self.state().in_session() {
                    count_abort(status);
                }
                self.enter(Phase::Error, status);
                return Ok(());
            }
        }

        let probe_interval = self.settings.boot_probe_interval_ms;
        let probe_due = match &mut self.phase {
            Phase::Booting { last_probe, .. }
                if probe_interval > 0 && now.saturating_sub(*last_probe) >= probe_interval =>
            {
                *last_probe = now;
                true
            }
            _ => false,
        };
        if probe_due {
            self.write_line(AT_PROBE).await?;
        }

        Ok(())
    }

    fn enter(&mut self, next: Phase, status: &mut Status) {
        let from = self.phase.state();
        self.phase = next;
        self.announce(from, status);
    }

    fn announce(&self, from: ModemState, status: &mut Status) {
        let to = self.phase.state();
        status.modem_state = to;
        if from != to {
            info!("Modem {:?} -> {:?}", from, to);
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        debug!("[modem tx] {}", line.trim_end());
        self.write_bytes(line.as_bytes()).await
    }

    async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.port
            .write_all(data)
            .await
            .map_err(|e| UplinkError::Serial(format!("write failed: {}", e)))?;
        self.port
            .flush()
            .await
            .map_err(|e| UplinkError::Serial(format!("flush failed: {}", e)))?;
        Ok(())
    }

    fn log_rx(&self, line: &str) {
        if self.settings.show_raw_responses {
            info!("[modem rx] {}", line);
        } else {
            debug!("[modem rx] {}", line);
        }
    }
}

/// A session that ended without a delivery confirmation
fn count_abort(status: &mut Status) {
    status.send_failures = status.send_failures.saturating_add(1);
}
