//! # Persistent Ring Buffer
//!
//! Bounded FIFO of [`Record`]s that survives power loss.
//!
//! ## Layout
//!
//! | Offset from base | Size | Content |
//! |------------------|------|---------|
//! | 0 | 1 | `count` |
//! | 1 | 1 | `head` (physical slot of the oldest record) |
//! | 2..16 | 14 | reserved |
//! | 16 + 8*i | 8 | slot `i` |
//!
//! Every persisted byte is compared with the stored value first and only
//! written when it differs.

use tracing::{debug, warn};

use super::eeprom::Eeprom;
use super::{Record, RECORD_BYTES};
use crate::error::{Result, UplinkError};

/// Bytes reserved for the header block ahead of the first slot
pub const HEADER_BYTES: usize = 16;

const COUNT_OFFSET: usize = 0;
const HEAD_OFFSET: usize = 1;

/// Bytes the ring occupies for a given capacity
pub const fn layout_size(capacity: u8) -> usize {
    HEADER_BYTES + capacity as usize * RECORD_BYTES
}

/// Durable bounded FIFO on top of an [`Eeprom`]
///
/// Full-buffer backpressure is the caller's problem: `push` never evicts.
///
/// # Examples
///
/// ```
/// use motion_uplink::storage::{MemEeprom, PersistentRing, Record};
///
/// let mut ring = PersistentRing::open(MemEeprom::new(128), 0, 10)?;
/// ring.push(Record::new(100, 1))?;
/// ring.push(Record::new(200, 2))?;
/// assert_eq!(ring.peek_oldest().map(|r| r.duration), Some(100));
/// assert!(ring.pop_oldest()?);
/// assert_eq!(ring.len(), 1);
/// # Ok::<(), motion_uplink::error::UplinkError>(())
/// ```
#[derive(Debug)]
pub struct PersistentRing<E: Eeprom> {
    storage: E,
    base: usize,
    capacity: u8,
    count: u8,
    head: u8,
}

impl<E: Eeprom> PersistentRing<E> {
    /// Load the ring from `storage`, resetting it if the header is corrupt
    ///
    /// A header with `count > capacity` or `head >= capacity` (including a
    /// factory-erased image) is replaced by an empty one.
    ///
    /// # Errors
    ///
    /// Returns error if `capacity` is 0, the layout does not fit in the
    /// image, or writing the reset header fails.
    pub fn open(storage: E, base: usize, capacity: u8) -> Result<Self> {
        if capacity == 0 {
            return Err(UplinkError::Storage("ring capacity must be greater than 0".to_string()));
        }

        let end = base + layout_size(capacity);
        if end > storage.size() {
            return Err(UplinkError::Storage(format!(
                "ring needs bytes {}..{} but image is {} bytes",
                base,
                end,
                storage.size()
            )));
        }

        let count = storage.read_byte(base + COUNT_OFFSET);
        let head = storage.read_byte(base + HEAD_OFFSET);

        let mut ring = Self {
            storage,
            base,
            capacity,
            count,
            head,
        };

        if count > capacity || head >= capacity {
            warn!(
                "Stored ring header corrupt (count={}, head={}, capacity={}), resetting to empty",
                count, head, capacity
            );
            ring.count = 0;
            ring.head = 0;
            ring.persist_header(0, 0)?;
        } else {
            debug!("Opened ring buffer with {} of {} records pending", count, capacity);
        }

        Ok(ring)
    }

    /// Append a record at the tail
    ///
    /// Returns `Ok(false)` without touching anything when the ring is full.
    pub fn push(&mut self, record: Record) -> Result<bool> {
        if self.is_full() {
            return Ok(false);
        }

        let tail = self.physical(self.count);
        self.write_slot(tail, &record)?;
        self.persist_header(self.head, self.count + 1)?;
        self.count += 1;
        Ok(true)
    }

    /// The oldest record, if any, without removing it
    pub fn peek_oldest(&self) -> Option<Record> {
        if self.is_empty() {
            return None;
        }
        Some(self.read_slot(self.head))
    }

    /// Remove whatever record is currently oldest
    ///
    /// Returns `Ok(false)` when the ring is empty. There is no ticket tying
    /// this to an earlier `peek_oldest`.
    pub fn pop_oldest(&mut self) -> Result<bool> {
        if self.is_empty() {
            return Ok(false);
        }

        let head = (self.head + 1) % self.capacity;
        self.persist_header(head, self.count - 1)?;
        self.head = head;
        self.count -= 1;
        Ok(true)
    }

    /// All pending records, oldest first
    pub fn records(&self) -> Vec<Record> {
        (0..self.count)
            .map(|i| self.read_slot(self.physical(i)))
            .collect()
    }

    pub fn len(&self) -> u8 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.capacity
    }

    pub fn capacity(&self) -> u8 {
        self.capacity
    }

    /// Physical slot index of the oldest record
    pub fn head(&self) -> u8 {
        self.head
    }

    pub fn storage(&self) -> &E {
        &self.storage
    }

    /// Give the storage backend back, e.g. to reopen it later
    pub fn into_storage(self) -> E {
        self.storage
    }

    fn physical(&self, logical: u8) -> u8 {
        ((self.head as usize + logical as usize) % self.capacity as usize) as u8
    }

    fn slot_addr(&self, slot: u8) -> usize {
        self.base + HEADER_BYTES + slot as usize * RECORD_BYTES
    }

    fn read_slot(&self, slot: u8) -> Record {
        let addr = self.slot_addr(slot);
        let mut bytes = [0u8; RECORD_BYTES];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.storage.read_byte(addr + i);
        }
        Record::from_bytes(&bytes)
    }

    fn write_slot(&mut self, slot: u8, record: &Record) -> Result<()> {
        let addr = self.slot_addr(slot);
        for (i, byte) in record.to_bytes().into_iter().enumerate() {
            self.update(addr + i, byte)?;
        }
        Ok(())
    }

    // head before count: a torn pop resurfaces a stale slot instead of
    // hiding the newest record. Memory is only updated once both bytes landed.
    fn persist_header(&mut self, head: u8, count: u8) -> Result<()> {
        self.update(self.base + HEAD_OFFSET, head)?;
        self.update(self.base + COUNT_OFFSET, count)
    }

    fn update(&mut self, addr: usize, value: u8) -> Result<()> {
        if self.storage.read_byte(addr) != value {
            self.storage.write_byte(addr, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::eeprom::{MemEeprom, MockEeprom, ERASED};
    use mockall::predicate::eq;
    use std::cell::Cell;
    use std::rc::Rc;

    fn ring(capacity: u8) -> PersistentRing<MemEeprom> {
        PersistentRing::open(MemEeprom::new(256), 0, capacity).unwrap()
    }

    fn durations<E: Eeprom>(ring: &PersistentRing<E>) -> Vec<u32> {
        ring.records().iter().map(|r| r.duration).collect()
    }

    #[test]
    fn test_push_three_peek_oldest() {
        let mut ring = ring(10);
        for (i, d) in [100, 200, 300].into_iter().enumerate() {
            assert!(ring.push(Record::new(d, i as u32)).unwrap());
        }

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.peek_oldest().unwrap().duration, 100);
        // peek does not consume
        assert_eq!(ring.peek_oldest().unwrap().duration, 100);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_push_fails_when_full() {
        let mut ring = ring(10);
        for d in 0..10 {
            assert!(ring.push(Record::new(d, d)).unwrap());
        }
        assert!(ring.is_full());

        let writes_before = ring.storage().writes();
        assert!(!ring.push(Record::new(999, 999)).unwrap());
        assert_eq!(ring.len(), 10);
        assert_eq!(ring.storage().writes(), writes_before);
        assert_eq!(ring.peek_oldest().unwrap().duration, 0);
    }

    #[test]
    fn test_pop_fails_when_empty() {
        let mut ring = ring(4);
        assert!(ring.is_empty());
        assert!(ring.peek_oldest().is_none());
        assert!(!ring.pop_oldest().unwrap());
        assert_eq!(ring.len(), 0);
        assert_eq!(ring.head(), 0);
    }

    #[test]
    fn test_fifo_order_across_wraparound() {
        let mut ring = ring(3);
        let mut expected = Vec::new();
        let mut next = 0u32;

        // Interleave pushes and pops so head walks around the ring several times
        for round in 0..7 {
            while !ring.is_full() {
                ring.push(Record::new(next, round)).unwrap();
                expected.push(next);
                next += 1;
            }
            for _ in 0..2 {
                let oldest = ring.peek_oldest().unwrap();
                assert_eq!(oldest.duration, expected.remove(0));
                assert!(ring.pop_oldest().unwrap());
            }
            assert_eq!(durations(&ring), expected);
            assert!(ring.len() <= ring.capacity());
            assert!(ring.head() < ring.capacity());
        }
    }

    #[test]
    fn test_state_survives_reopen() {
        let mut ring = ring(5);
        for d in [10, 20, 30, 40] {
            ring.push(Record::new(d, d + 1)).unwrap();
        }
        ring.pop_oldest().unwrap();

        let reopened = PersistentRing::open(ring.into_storage(), 0, 5).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.head(), 1);
        assert_eq!(durations(&reopened), vec![20, 30, 40]);
        assert_eq!(reopened.peek_oldest(), Some(Record::new(20, 21)));
    }

    #[test]
    fn test_erased_image_resets_to_empty() {
        let ring = ring(10);
        assert!(ring.is_empty());
        assert_eq!(ring.storage().as_bytes()[0], 0);
        assert_eq!(ring.storage().as_bytes()[1], 0);
        // slots are left untouched
        assert_eq!(ring.storage().as_bytes()[HEADER_BYTES], ERASED);
    }

    #[test]
    fn test_corrupt_head_resets_to_empty() {
        let mut eeprom = MemEeprom::new(128);
        eeprom.write_byte(COUNT_OFFSET, 2).unwrap();
        eeprom.write_byte(HEAD_OFFSET, 10).unwrap();

        let ring = PersistentRing::open(eeprom, 0, 10).unwrap();
        assert!(ring.is_empty());
        assert_eq!(ring.head(), 0);
    }

    #[test]
    fn test_base_offset_is_respected() {
        let mut ring = PersistentRing::open(MemEeprom::new(256), 100, 4).unwrap();
        ring.push(Record::new(0x0A0B0C0D, 0)).unwrap();

        let bytes = ring.storage().as_bytes();
        assert_eq!(bytes[0], ERASED);
        assert_eq!(bytes[100], 1);
        assert_eq!(bytes[101], 0);
        assert_eq!(&bytes[116..120], &[0x0D, 0x0C, 0x0B, 0x0A]);
    }

    #[test]
    fn test_layout_must_fit() {
        let result = PersistentRing::open(MemEeprom::new(95), 0, 10);
        assert!(matches!(result, Err(UplinkError::Storage(_))));
        assert!(PersistentRing::open(MemEeprom::new(96), 0, 10).is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(PersistentRing::open(MemEeprom::new(64), 0, 0).is_err());
    }

    #[test]
    fn test_unchanged_bytes_are_not_rewritten() {
        let mut ring = ring(2);
        ring.push(Record::new(7, 7)).unwrap();
        ring.pop_oldest().unwrap();
        ring.push(Record::new(8, 8)).unwrap();
        ring.pop_oldest().unwrap();

        // Slot 0 already holds (7, 7): rewriting it costs only the header
        let before = ring.storage().writes();
        assert_eq!(ring.head(), 0);
        ring.push(Record::new(7, 7)).unwrap();
        assert_eq!(ring.storage().writes() - before, 1);
    }

    #[test]
    fn test_push_writes_only_changed_bytes() {
        let mut eeprom = MockEeprom::new();
        eeprom.expect_size().return_const(64usize);
        // Zeroed image: valid empty header, zeroed slots
        eeprom.expect_read_byte().return_const(0u8);
        // duration=1 differs from the stored slot in one byte, then count 0 -> 1
        eeprom
            .expect_write_byte()
            .with(eq(HEADER_BYTES), eq(1u8))
            .times(1)
            .returning(|_, _| Ok(()));
        eeprom
            .expect_write_byte()
            .with(eq(COUNT_OFFSET), eq(1u8))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut ring = PersistentRing::open(eeprom, 0, 4).unwrap();
        assert!(ring.push(Record::new(1, 0)).unwrap());
    }

    #[test]
    fn test_storage_error_propagates() {
        let mut eeprom = MockEeprom::new();
        eeprom.expect_size().return_const(64usize);
        eeprom.expect_read_byte().return_const(0u8);
        eeprom
            .expect_write_byte()
            .returning(|_, _| Err(UplinkError::Storage("worn out".to_string())));

        let mut ring = PersistentRing::open(eeprom, 0, 4).unwrap();
        assert!(ring.push(Record::new(1, 0)).is_err());
        assert_eq!(ring.len(), 0);
        assert!(ring.peek_oldest().is_none());
    }

    /// Image whose writes start failing once the shared flag is set
    struct WornEeprom {
        inner: MemEeprom,
        worn: Rc<Cell<bool>>,
    }

    impl Eeprom for WornEeprom {
        fn size(&self) -> usize {
            self.inner.size()
        }

        fn read_byte(&self, addr: usize) -> u8 {
            self.inner.read_byte(addr)
        }

        fn write_byte(&mut self, addr: usize, value: u8) -> Result<()> {
            if self.worn.get() {
                return Err(UplinkError::Storage("worn out".to_string()));
            }
            self.inner.write_byte(addr, value)
        }
    }

    #[test]
    fn test_failed_header_write_keeps_memory_in_step_with_image() {
        let worn = Rc::new(Cell::new(false));
        let eeprom = WornEeprom {
            inner: MemEeprom::new(256),
            worn: worn.clone(),
        };
        let mut ring = PersistentRing::open(eeprom, 0, 4).unwrap();
        ring.push(Record::new(100, 0)).unwrap();
        ring.push(Record::new(200, 1)).unwrap();

        worn.set(true);
        assert!(ring.pop_oldest().is_err());
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.head(), 0);
        assert_eq!(durations(&ring), vec![100, 200]);

        assert!(ring.push(Record::new(300, 2)).is_err());
        assert_eq!(ring.len(), 2);

        // What is in memory is what a reopen finds
        worn.set(false);
        let reopened = PersistentRing::open(ring.into_storage(), 0, 4).unwrap();
        assert_eq!(durations(&reopened), vec![100, 200]);
    }
}
