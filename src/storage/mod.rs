//! # Storage Module
//!
//! Durable FIFO of pending telemetry records.
//!
//! This module handles:
//! - The [`Record`] type and its 8-byte persisted encoding
//! - Byte-addressable storage backends ([`eeprom::Eeprom`])
//! - The write-minimising persistent ring buffer ([`ring::PersistentRing`])

pub mod eeprom;
pub mod ring;

pub use eeprom::{Eeprom, FileEeprom, MemEeprom};
pub use ring::PersistentRing;

/// Size of one persisted record in bytes
pub const RECORD_BYTES: usize = 8;

/// One completed motion event
///
/// Immutable once created. Produced by the sensing path, removed from storage
/// only after the modem confirms delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Record {
    /// Motion duration in milliseconds
    pub duration: u32,
    /// Time the motion was recorded, in Unix seconds
    pub timestamp: u32,
}

impl Record {
    pub fn new(duration: u32, timestamp: u32) -> Self {
        Self { duration, timestamp }
    }

    /// Encode as duration then timestamp, both little-endian
    pub fn to_bytes(&self) -> [u8; RECORD_BYTES] {
        let mut bytes = [0u8; RECORD_BYTES];
        bytes[..4].copy_from_slice(&self.duration.to_le_bytes());
        bytes[4..].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; RECORD_BYTES]) -> Self {
        Self {
            duration: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            timestamp: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}
