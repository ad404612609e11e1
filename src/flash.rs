use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use log::debug;
use crate::constants::FLASH_SECTOR_SIZE;
use crate::error::DriverError;

/// Synchronous flash access; every call blocks until the operation completes
pub trait FlashDriver {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), DriverError>;
    /// Erase `len` bytes at `offset`, both aligned to the sector size
    fn erase_region(&mut self, offset: u32, len: u32) -> Result<(), DriverError>;
    /// Program `data` at `offset`; the range must have been erased first
    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), DriverError>;
}

/// Flash dump file standing in for the chip's flash
///
/// Writes follow NOR semantics: bits can only be cleared, so writing over
/// unerased data leaves `old & new` behind just like the real part.
pub struct ImageFileFlash {
    file: File,
    capacity: u32,
}

impl ImageFileFlash {
    pub fn open(path: &Path) -> Result<Self, DriverError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let capacity = u32::try_from(len)
            .map_err(|_| DriverError::Device(format!("image of {} bytes exceeds 32-bit flash", len)))?;
        debug!("Opened flash image {} ({} bytes)", path.display(), capacity);
        Ok(ImageFileFlash { file, capacity })
    }

    /// Create an erased image of `capacity` bytes
    pub fn create_erased(path: &Path, capacity: u32) -> Result<Self, DriverError> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(path)?;
        file.write_all_at(&vec![0xFF; capacity as usize], 0)?;
        Ok(ImageFileFlash { file, capacity })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn check_bounds(&self, offset: u32, len: u32) -> Result<(), DriverError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.capacity => Ok(()),
            _ => Err(DriverError::OutOfBounds { offset, len, capacity: self.capacity }),
        }
    }
}

impl FlashDriver for ImageFileFlash {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), DriverError> {
        self.check_bounds(offset, buf.len() as u32)?;
        self.file.read_exact_at(buf, offset as u64)?;
        Ok(())
    }

    fn erase_region(&mut self, offset: u32, len: u32) -> Result<(), DriverError> {
        if offset % FLASH_SECTOR_SIZE != 0 || len % FLASH_SECTOR_SIZE != 0 {
            return Err(DriverError::Unaligned { offset, len, align: FLASH_SECTOR_SIZE });
        }
        self.check_bounds(offset, len)?;
        self.file.write_all_at(&vec![0xFF; len as usize], offset as u64)?;
        debug!("Erased 0x{:x}+0x{:x}", offset, len);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), DriverError> {
        self.check_bounds(offset, data.len() as u32)?;
        let mut current = vec![0u8; data.len()];
        self.file.read_exact_at(&mut current, offset as u64)?;
        for (old, new) in current.iter_mut().zip(data) {
            *old &= *new;
        }
        self.file.write_all_at(&current, offset as u64)?;
        self.file.sync_data()?;
        debug!("Wrote {} bytes at 0x{:x}", data.len(), offset);
        Ok(())
    }
}
