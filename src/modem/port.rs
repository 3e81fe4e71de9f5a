//! Trait abstraction for the modem's serial channel to enable testing

use async_trait::async_trait;
use std::io;

/// Half-duplex byte channel to the modem plus its power line
#[async_trait]
pub trait ModemPort: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Read whatever bytes have arrived
    ///
    /// Waits at most the port's read window; `Ok(0)` means nothing arrived.
    async fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Switch the modem's power rail
    fn set_power(&mut self, on: bool) -> io::Result<()>;
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Inner {
        incoming: VecDeque<u8>,
        written: Vec<Vec<u8>>,
        power: Vec<bool>,
        write_error: Option<io::ErrorKind>,
    }

    /// Scripted modem for testing
    ///
    /// Clones share state, so a test keeps one handle after moving the
    /// other into the driver.
    #[derive(Clone, Default)]
    pub struct ScriptedPort {
        inner: Arc<Mutex<Inner>>,
    }

    impl ScriptedPort {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a CRLF-terminated response line
        pub fn push_line(&self, line: &str) {
            self.push_raw(format!("{}\r\n", line).as_bytes());
        }

        /// Queue raw bytes exactly as given
        pub fn push_raw(&self, data: &[u8]) {
            self.inner.lock().unwrap().incoming.extend(data.iter().copied());
        }

        /// Every write so far, lossily decoded
        pub fn written(&self) -> Vec<String> {
            self.inner
                .lock()
                .unwrap()
                .written
                .iter()
                .map(|w| String::from_utf8_lossy(w).into_owned())
                .collect()
        }

        /// Return and forget every write so far
        pub fn take_written(&self) -> Vec<String> {
            let written = std::mem::take(&mut self.inner.lock().unwrap().written);
            written
                .iter()
                .map(|w| String::from_utf8_lossy(w).into_owned())
                .collect()
        }

        pub fn power_events(&self) -> Vec<bool> {
            self.inner.lock().unwrap().power.clone()
        }

        pub fn set_write_error(&self, error: io::ErrorKind) {
            self.inner.lock().unwrap().write_error = Some(error);
        }
    }

    #[async_trait]
    impl ModemPort for ScriptedPort {
        async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(error) = inner.write_error {
                return Err(io::Error::new(error, "Mock write error"));
            }
            inner.written.push(data.to_vec());
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        async fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut inner = self.inner.lock().unwrap();
            let n = buf.len().min(inner.incoming.len());
            for (slot, byte) in buf.iter_mut().zip(inner.incoming.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }

        fn set_power(&mut self, on: bool) -> io::Result<()> {
            self.inner.lock().unwrap().power.push(on);
            Ok(())
        }
    }
}
