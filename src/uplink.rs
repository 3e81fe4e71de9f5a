//! # Uplink
//!
//! Owns the modem driver, the persistent buffer, the scheduler and the
//! status register, and runs them in a fixed order on every tick.
//!
//! ```no_run
//! use motion_uplink::config::Config;
//! use motion_uplink::modem::{DriverSettings, ModemDriver, TokioSerialPort};
//! use motion_uplink::storage::{FileEeprom, PersistentRing};
//! use motion_uplink::uplink::Uplink;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/default.toml")?;
//!     let port = TokioSerialPort::open(&config.serial)?;
//!     let image = FileEeprom::open(&config.storage.image_path, config.storage.image_size)?;
//!     let buffer = PersistentRing::open(image, config.storage.base_offset, config.storage.capacity)?;
//!
//!     let driver = ModemDriver::new(port, DriverSettings::from_config(&config));
//!     let mut uplink = Uplink::new(driver, buffer, config.uplink.min_send_interval_ms);
//!     uplink.power_on(0).await?;
//!     uplink.record_motion(1500, 42)?;
//!     uplink.tick(50).await?;
//!     Ok(())
//! }
//! ```

use tracing::{info, warn};

use crate::error::Result;
use crate::modem::{ModemDriver, ModemPort};
use crate::scheduler::UplinkScheduler;
use crate::status::{ModemState, SensorState, Status};
use crate::storage::{Eeprom, PersistentRing, Record};

pub struct Uplink<P: ModemPort, E: Eeprom> {
    driver: ModemDriver<P>,
    buffer: PersistentRing<E>,
    scheduler: UplinkScheduler,
    status: Status,
}

impl<P: ModemPort, E: Eeprom> Uplink<P, E> {
    pub fn new(driver: ModemDriver<P>, buffer: PersistentRing<E>, min_send_interval_ms: u64) -> Self {
        let mut status = Status::new();
        status.modem_state = driver.state();
        status.stored_count = buffer.len();

        Self {
            driver,
            buffer,
            scheduler: UplinkScheduler::new(min_send_interval_ms),
            status,
        }
    }

    /// One cooperative step: react to the modem, then maybe start a send
    pub async fn tick(&mut self, now: u64) -> Result<()> {
        self.driver.poll(now, &mut self.buffer, &mut self.status).await?;
        self.scheduler
            .tick(now, &mut self.driver, &self.buffer, &mut self.status)
            .await?;
        Ok(())
    }

    /// Queue a detected motion event
    ///
    /// A full buffer drops the new event; returns `Ok(false)` in that case.
    pub fn record_motion(&mut self, duration: u32, timestamp: u32) -> Result<bool> {
        let stored = self.buffer.push(Record::new(duration, timestamp))?;
        self.status.stored_count = self.buffer.len();

        if stored {
            info!(
                "Motion of {} ms queued ({}/{})",
                duration,
                self.buffer.len(),
                self.buffer.capacity()
            );
        } else {
            self.status.dropped_count = self.status.dropped_count.saturating_add(1);
            warn!(
                "Buffer full, dropped motion of {} ms ({} dropped so far)",
                duration, self.status.dropped_count
            );
        }
        Ok(stored)
    }

    pub fn set_sensor_state(&mut self, state: SensorState) {
        self.status.sensor_state = state;
    }

    pub async fn power_on(&mut self, now: u64) -> Result<bool> {
        self.driver.power_on(now, &mut self.status).await
    }

    pub fn power_off(&mut self) -> Result<()> {
        self.driver.power_off(&mut self.status)
    }

    pub fn request_immediate_send(&mut self) {
        self.scheduler.request_immediate_send();
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn buffer(&self) -> &PersistentRing<E> {
        &self.buffer
    }

    pub fn modem_state(&self) -> ModemState {
        self.driver.state()
    }

    pub fn driver(&self) -> &ModemDriver<P> {
        &self.driver
    }
}
