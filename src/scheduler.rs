//! # Uplink Scheduler
//!
//! Decides once per tick whether a send session starts. Sends are spaced by
//! a minimum interval; a manual override skips the wait once.

use tracing::debug;

use crate::error::Result;
use crate::modem::{ModemDriver, ModemPort};
use crate::status::Status;
use crate::storage::{Eeprom, PersistentRing};

#[derive(Debug)]
pub struct UplinkScheduler {
    min_interval_ms: u64,
    last_trigger: Option<u64>,
    override_requested: bool,
}

impl UplinkScheduler {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms,
            last_trigger: None,
            override_requested: false,
        }
    }

    /// Skip the rate limit for the next send
    ///
    /// Stays set until a session is actually started.
    pub fn request_immediate_send(&mut self) {
        self.override_requested = true;
    }

    pub fn override_requested(&self) -> bool {
        self.override_requested
    }

    pub fn last_trigger(&self) -> Option<u64> {
        self.last_trigger
    }

    /// Start a send of the oldest record if the modem and the rate limit allow
    ///
    /// Returns `Ok(true)` when a session was started. Never removes from the
    /// buffer; the driver pops once delivery is confirmed.
    pub async fn tick<P: ModemPort, E: Eeprom>(
        &mut self,
        now: u64,
        driver: &mut ModemDriver<P>,
        buffer: &PersistentRing<E>,
        status: &mut Status,
    ) -> Result<bool> {
        if !driver.is_ready() {
            return Ok(false);
        }
        let Some(record) = buffer.peek_oldest() else {
            return Ok(false);
        };
        if !self.override_requested && !self.window_elapsed(now) {
            return Ok(false);
        }

        if !driver.begin_send(&record, now, status).await? {
            return Ok(false);
        }

        if self.override_requested {
            debug!("Immediate send started");
        }
        self.override_requested = false;
        self.last_trigger = Some(now);
        status.last_send_attempt_time = now;
        Ok(true)
    }

    fn window_elapsed(&self, now: u64) -> bool {
        match self.last_trigger {
            Some(last) => now.saturating_sub(last) >= self.min_interval_ms,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::modem::port::mocks::ScriptedPort;
    use crate::modem::DriverSettings;
    use crate::status::ModemState;
    use crate::storage::ring::layout_size;
    use crate::storage::{MemEeprom, Record};
    use tokio_test::block_on;

    const INTERVAL: u64 = 20_000;

    struct Rig {
        driver: ModemDriver<ScriptedPort>,
        port: ScriptedPort,
        ring: PersistentRing<MemEeprom>,
        status: Status,
    }

    impl Rig {
        fn ready(records: u32) -> Self {
            let port = ScriptedPort::new();
            let mut driver = ModemDriver::new(port.clone(), DriverSettings::from_config(&test_config()));
            let mut ring = PersistentRing::open(MemEeprom::new(layout_size(10)), 0, 10).unwrap();
            for i in 0..records {
                ring.push(Record::new(100 * (i + 1), i)).unwrap();
            }
            let mut status = Status::new();

            block_on(async {
                driver.power_on(0, &mut status).await.unwrap();
                port.push_line("WIFI GOT IP");
                driver.poll(1, &mut ring, &mut status).await.unwrap();
            });
            assert_eq!(driver.state(), ModemState::Ready);
            port.take_written();

            Self {
                driver,
                port,
                ring,
                status,
            }
        }

        fn tick(&mut self, scheduler: &mut UplinkScheduler, now: u64) -> bool {
            block_on(scheduler.tick(now, &mut self.driver, &self.ring, &mut self.status)).unwrap()
        }

        /// Complete the running session with `result`
        fn finish(&mut self, now: u64, result: &str) {
            for line in ["CONNECT", ">", result] {
                self.port.push_line(line);
                block_on(self.driver.poll(now, &mut self.ring, &mut self.status)).unwrap();
            }
            assert_eq!(self.driver.state(), ModemState::Ready);
        }
    }

    #[test]
    fn test_first_send_is_not_rate_limited() {
        let mut rig = Rig::ready(1);
        let mut scheduler = UplinkScheduler::new(INTERVAL);

        assert!(rig.tick(&mut scheduler, 5));
        assert_eq!(rig.driver.state(), ModemState::AwaitConnectAck);
        assert_eq!(rig.status.last_send_attempt_time, 5);
        assert_eq!(scheduler.last_trigger(), Some(5));
        // The scheduler never pops
        assert_eq!(rig.ring.len(), 1);
    }

    #[test]
    fn test_rate_limit_spaces_sends() {
        let mut rig = Rig::ready(3);
        let mut scheduler = UplinkScheduler::new(INTERVAL);

        assert!(rig.tick(&mut scheduler, 1000));
        rig.finish(1100, "SEND OK");

        assert!(!rig.tick(&mut scheduler, 1000 + INTERVAL - 1));
        assert_eq!(rig.driver.state(), ModemState::Ready);

        assert!(rig.tick(&mut scheduler, 1000 + INTERVAL));
        assert_eq!(rig.status.last_send_attempt_time, 1000 + INTERVAL);
    }

    #[test]
    fn test_failed_send_waits_for_next_window() {
        let mut rig = Rig::ready(1);
        let mut scheduler = UplinkScheduler::new(INTERVAL);

        assert!(rig.tick(&mut scheduler, 0));
        rig.finish(100, "SEND FAIL");
        assert_eq!(rig.ring.len(), 1);

        assert!(!rig.tick(&mut scheduler, 200));
        assert!(rig.tick(&mut scheduler, INTERVAL));
    }

    #[test]
    fn test_override_skips_rate_limit_once() {
        let mut rig = Rig::ready(3);
        let mut scheduler = UplinkScheduler::new(INTERVAL);

        assert!(rig.tick(&mut scheduler, 0));
        rig.finish(100, "SEND OK");

        scheduler.request_immediate_send();
        assert!(scheduler.override_requested());
        assert!(rig.tick(&mut scheduler, 200));
        assert!(!scheduler.override_requested());
        rig.finish(300, "SEND OK");

        assert!(!rig.tick(&mut scheduler, 400));
    }

    #[test]
    fn test_override_survives_busy_modem() {
        let mut rig = Rig::ready(2);
        let mut scheduler = UplinkScheduler::new(INTERVAL);

        assert!(rig.tick(&mut scheduler, 0));
        scheduler.request_immediate_send();

        // Session still running: nothing starts, override kept
        assert!(!rig.tick(&mut scheduler, 50));
        assert!(scheduler.override_requested());
        assert_eq!(rig.status.last_send_attempt_time, 0);

        rig.finish(100, "SEND OK");
        assert!(rig.tick(&mut scheduler, 150));
        assert!(!scheduler.override_requested());
    }

    #[test]
    fn test_empty_buffer_never_triggers() {
        let mut rig = Rig::ready(0);
        let mut scheduler = UplinkScheduler::new(INTERVAL);
        scheduler.request_immediate_send();

        assert!(!rig.tick(&mut scheduler, 0));
        assert!(scheduler.override_requested());
        assert!(rig.port.written().is_empty());
        assert_eq!(scheduler.last_trigger(), None);
    }

    #[test]
    fn test_modem_not_ready_never_triggers() {
        let mut rig = Rig::ready(1);
        rig.driver.power_off(&mut rig.status).unwrap();
        let mut scheduler = UplinkScheduler::new(INTERVAL);

        assert!(!rig.tick(&mut scheduler, 0));
        assert_eq!(rig.ring.len(), 1);
        assert!(rig.port.written().is_empty());
    }
}
