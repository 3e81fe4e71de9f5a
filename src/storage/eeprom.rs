//! Byte-addressable persistent storage backends

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, UplinkError};

/// Value of an erased EEPROM cell
pub const ERASED: u8 = 0xFF;

/// Byte-addressable storage with limited write endurance
///
/// Reads are served from memory and cannot fail; each `write_byte` is one
/// physical write and should only be issued for bytes that actually change.
#[cfg_attr(test, mockall::automock)]
pub trait Eeprom {
    /// Image size in bytes
    fn size(&self) -> usize;

    /// Read one byte; out-of-range addresses read as erased
    fn read_byte(&self, addr: usize) -> u8;

    /// Write one byte
    fn write_byte(&mut self, addr: usize, value: u8) -> Result<()>;
}

fn out_of_range(addr: usize, size: usize) -> UplinkError {
    UplinkError::Storage(format!("address {} outside {}-byte image", addr, size))
}

/// In-memory EEPROM image
///
/// Starts fully erased and counts physical writes.
#[derive(Debug, Clone)]
pub struct MemEeprom {
    bytes: Vec<u8>,
    writes: usize,
}

impl MemEeprom {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![ERASED; size],
            writes: 0,
        }
    }

    /// Number of `write_byte` calls issued so far
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Eeprom for MemEeprom {
    fn size(&self) -> usize {
        self.bytes.len()
    }

    fn read_byte(&self, addr: usize) -> u8 {
        self.bytes.get(addr).copied().unwrap_or(ERASED)
    }

    fn write_byte(&mut self, addr: usize, value: u8) -> Result<()> {
        let size = self.bytes.len();
        let cell = self.bytes.get_mut(addr).ok_or_else(|| out_of_range(addr, size))?;
        *cell = value;
        self.writes += 1;
        Ok(())
    }
}

/// EEPROM image backed by a fixed-size file
///
/// The whole image is cached in memory; writes go through to the file one
/// byte at a time and are synced before returning.
#[derive(Debug)]
pub struct FileEeprom {
    path: PathBuf,
    file: File,
    image: Vec<u8>,
}

impl FileEeprom {
    /// Open an existing image or create an erased one
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or an existing image does
    /// not have exactly `size` bytes.
    pub fn open<P: AsRef<Path>>(path: P, size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut image = Vec::with_capacity(size);
        file.read_to_end(&mut image)?;

        if image.is_empty() {
            info!("Creating erased {}-byte storage image at {}", size, path.display());
            image = vec![ERASED; size];
            file.write_all(&image)?;
            file.sync_all()?;
        } else if image.len() != size {
            return Err(UplinkError::Storage(format!(
                "{} holds {} bytes, expected {}",
                path.display(),
                image.len(),
                size
            )));
        } else {
            debug!("Loaded {}-byte storage image from {}", size, path.display());
        }

        Ok(Self { path, file, image })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Eeprom for FileEeprom {
    fn size(&self) -> usize {
        self.image.len()
    }

    fn read_byte(&self, addr: usize) -> u8 {
        self.image.get(addr).copied().unwrap_or(ERASED)
    }

    fn write_byte(&mut self, addr: usize, value: u8) -> Result<()> {
        if addr >= self.image.len() {
            return Err(out_of_range(addr, self.image.len()));
        }

        self.file.seek(SeekFrom::Start(addr as u64))?;
        self.file.write_all(&[value])?;
        self.file.sync_data()?;
        self.image[addr] = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_mem_eeprom_starts_erased() {
        let eeprom = MemEeprom::new(32);
        assert_eq!(eeprom.size(), 32);
        assert!(eeprom.as_bytes().iter().all(|&b| b == ERASED));
        assert_eq!(eeprom.writes(), 0);
    }

    #[test]
    fn test_mem_eeprom_counts_writes() {
        let mut eeprom = MemEeprom::new(4);
        eeprom.write_byte(1, 0x42).unwrap();
        eeprom.write_byte(1, 0x42).unwrap();
        assert_eq!(eeprom.read_byte(1), 0x42);
        assert_eq!(eeprom.writes(), 2);
    }

    #[test]
    fn test_mem_eeprom_out_of_range() {
        let mut eeprom = MemEeprom::new(4);
        assert_eq!(eeprom.read_byte(10), ERASED);
        assert!(matches!(eeprom.write_byte(4, 0), Err(UplinkError::Storage(_))));
        assert_eq!(eeprom.writes(), 0);
    }

    #[test]
    fn test_file_eeprom_creates_erased_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("eeprom.bin");

        let eeprom = FileEeprom::open(&path, 64).unwrap();
        assert_eq!(eeprom.size(), 64);
        assert_eq!(eeprom.read_byte(0), ERASED);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 64);
    }

    #[test]
    fn test_file_eeprom_persists_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("eeprom.bin");

        {
            let mut eeprom = FileEeprom::open(&path, 64).unwrap();
            eeprom.write_byte(0, 3).unwrap();
            eeprom.write_byte(63, 0x10).unwrap();
        }

        let reopened = FileEeprom::open(&path, 64).unwrap();
        assert_eq!(reopened.read_byte(0), 3);
        assert_eq!(reopened.read_byte(1), ERASED);
        assert_eq!(reopened.read_byte(63), 0x10);
    }

    #[test]
    fn test_file_eeprom_rejects_size_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("eeprom.bin");
        FileEeprom::open(&path, 64).unwrap();

        let result = FileEeprom::open(&path, 128);
        assert!(matches!(result, Err(UplinkError::Storage(_))));
    }

    #[test]
    fn test_file_eeprom_write_out_of_range() {
        let dir = tempdir().unwrap();
        let mut eeprom = FileEeprom::open(dir.path().join("e.bin"), 8).unwrap();
        assert!(eeprom.write_byte(8, 1).is_err());
    }
}
