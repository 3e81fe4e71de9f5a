//! # Shared Status
//!
//! Status register read by the UI and shell, owned by [`crate::uplink::Uplink`]
//! and lent by `&mut` to the components that write it.
//!
//! | Field | Writer |
//! |-------|--------|
//! | `modem_state`, `last_send_ok`, `last_send_success_time`, `send_failures` | modem driver |
//! | `last_send_attempt_time` | uplink scheduler |
//! | `sensor_state`, `dropped_count` | sensing path |
//! | `stored_count` | whoever mutated the ring buffer |
//!
//! All times are milliseconds on the uplink's monotonic clock.

use serde::Serialize;

/// Public projection of the modem driver's protocol state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModemState {
    #[default]
    Off,
    Booting,
    Associating,
    Ready,
    AwaitConnectAck,
    AwaitSendPrompt,
    AwaitSendResult,
    Error,
}

impl ModemState {
    /// True while a TCP send session is in flight
    pub fn in_session(&self) -> bool {
        matches!(
            self,
            ModemState::AwaitConnectAck | ModemState::AwaitSendPrompt | ModemState::AwaitSendResult
        )
    }
}

/// Motion sensor state as reported by the sensing collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensorState {
    Off,
    #[default]
    Idle,
    Motion,
}

/// Cross-cutting status register
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Status {
    pub modem_state: ModemState,
    pub sensor_state: SensorState,
    pub stored_count: u8,
    pub last_send_ok: bool,
    pub last_send_attempt_time: u64,
    pub last_send_success_time: u64,
    /// Records refused because the ring buffer was full
    pub dropped_count: u32,
    /// Sessions that ended without a delivery confirmation
    pub send_failures: u32,
}

impl Status {
    pub fn new() -> Self {
        Self::default()
    }

    /// JSON snapshot for the shell's `status` command
    pub fn to_json(&self) -> String {
        // Every field is a plain scalar or unit enum, serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}
