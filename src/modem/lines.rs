//! Line accumulator for the modem's response stream
//!
//! Bytes arrive in arbitrary chunks. Complete lines (terminated by `\n`) are
//! handed out one at a time, trimmed, with blank lines skipped. A partial line
//! stays buffered across ticks. If a partial line grows past the configured
//! bound it is discarded, along with the rest of it up to the next `\n`.

use bytes::BytesMut;
use tracing::warn;

/// Bounded accumulator yielding complete response lines
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    max_len: usize,
    overflows: u32,
    // Skipping the remainder of an overflowed line
    discarding: bool,
}

impl LineBuffer {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_len),
            max_len,
            overflows: 0,
            discarding: false,
        }
    }

    /// Append freshly received bytes
    pub fn extend(&mut self, data: &[u8]) {
        let data = if self.discarding {
            match data.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    &data[pos + 1..]
                }
                None => return,
            }
        } else {
            data
        };

        self.buf.extend_from_slice(data);
        self.enforce_bound();
    }

    /// Next complete, trimmed, non-empty line
    pub fn next_line(&mut self) -> Option<String> {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw = self.buf.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw);
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        None
    }

    /// Trimmed view of the unterminated tail, if any
    pub fn partial(&self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.buf);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    /// Number of partial lines discarded for exceeding the bound
    pub fn overflows(&self) -> u32 {
        self.overflows
    }

    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    fn enforce_bound(&mut self) {
        let tail_start = self
            .buf
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |p| p + 1);
        let tail_len = self.buf.len() - tail_start;
        if tail_len <= self.max_len {
            return;
        }

        // Keep complete lines, drop the runaway tail
        warn!(
            "Discarding {} byte modem line without terminator (limit {})",
            tail_len, self.max_len
        );
        self.buf.truncate(tail_start);
        self.overflows += 1;
        self.discarding = true;
    }
}
