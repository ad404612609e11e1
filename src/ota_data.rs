//! Boot pointer kept in the `otadata` partition.
//!
//! Two sectors each hold a 32-byte select entry
//! `seq:u32 seq_label[20] state:u32 crc:u32`. The entry with the highest valid
//! sequence number wins and selects slot `ota_{(seq - 1) % slot_count}`.
use crc32fast::Hasher;
use log::{debug, info, warn};
use crate::catalog::PartitionCatalog;
use crate::constants::*;
use crate::error::{DriverError, OtaError};
use crate::flash::FlashDriver;
use crate::ota::BootPointerStore;
use crate::partition::{PartitionEntry, PartitionSubtype, PartitionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SelectEntry {
    seq: u32,
    state: u32,
    crc: u32,
}

impl SelectEntry {
    fn new(seq: u32) -> Self {
        SelectEntry {
            seq,
            state: OTA_IMG_STATE_UNDEFINED,
            crc: seq_crc(seq),
        }
    }

    fn decode(raw: &[u8; OTA_SELECT_ENTRY_SIZE]) -> Self {
        let word = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        SelectEntry {
            seq: word(0),
            state: word(4 + OTA_SEQ_LABEL_LEN),
            crc: word(8 + OTA_SEQ_LABEL_LEN),
        }
    }

    fn encode(&self) -> [u8; OTA_SELECT_ENTRY_SIZE] {
        let mut raw = [0xFF; OTA_SELECT_ENTRY_SIZE];
        raw[0..4].copy_from_slice(&self.seq.to_le_bytes());
        raw[4 + OTA_SEQ_LABEL_LEN..8 + OTA_SEQ_LABEL_LEN].copy_from_slice(&self.state.to_le_bytes());
        raw[8 + OTA_SEQ_LABEL_LEN..].copy_from_slice(&self.crc.to_le_bytes());
        raw
    }

    fn is_valid(&self) -> bool {
        self.seq != 0
            && self.seq != OTA_SEQ_ERASED
            && self.crc == seq_crc(self.seq)
            && self.state != OTA_IMG_STATE_INVALID
            && self.state != OTA_IMG_STATE_ABORTED
    }
}

/// CRC the bootloader keeps over the sequence number (ROM crc32_le seeded with all ones)
fn seq_crc(seq: u32) -> u32 {
    let mut hasher = Hasher::new_with_initial(u32::MAX);
    hasher.update(&seq.to_le_bytes());
    hasher.finalize()
}

/// Index of the sector holding the winning entry
fn active_sector(entries: &[SelectEntry; 2]) -> Option<usize> {
    match (entries[0].is_valid(), entries[1].is_valid()) {
        (true, true) if entries[1].seq > entries[0].seq => Some(1),
        (true, _) => Some(0),
        (false, true) => Some(1),
        (false, false) => None,
    }
}

/// Smallest sequence number above `current` that selects slot `index`
///
/// `None` once no such number stays below the erased marker.
fn next_seq(current: u32, index: u32, slot_count: u32) -> Option<u32> {
    let first = index + 1;
    let steps = if current < first { 0 } else { (current - first) / slot_count + 1 };
    steps
        .checked_mul(slot_count)?
        .checked_add(first)
        .filter(|seq| *seq < OTA_SEQ_ERASED)
}

pub struct OtaDataStore<'a, F> {
    flash: &'a mut F,
    catalog: &'a PartitionCatalog,
}

impl<'a, F: FlashDriver> OtaDataStore<'a, F> {
    pub fn new(flash: &'a mut F, catalog: &'a PartitionCatalog) -> Self {
        OtaDataStore { flash, catalog }
    }

    fn otadata(&self) -> Option<&'a PartitionEntry> {
        self.catalog.find_first(Some(PartitionType::Data), Some(PartitionSubtype::OtaData), None)
    }

    fn slot_count(&self) -> u32 {
        self.catalog
            .enumerate(Some(PartitionType::App), None, None)
            .filter(|entry| entry.ota_index().is_some())
            .count() as u32
    }

    /// What the bootloader falls back to without a valid select entry
    fn fallback_app(&self) -> Result<PartitionEntry, OtaError> {
        self.catalog
            .find_first(Some(PartitionType::App), Some(PartitionSubtype::Factory), None)
            .or_else(|| self.catalog.find_first(Some(PartitionType::App), None, None))
            .cloned()
            .ok_or_else(|| OtaError::RunningUnknown("table has no app partition".to_string()))
    }

    fn read_entries(&mut self, otadata: &PartitionEntry) -> Result<[SelectEntry; 2], DriverError> {
        let mut entries = [SelectEntry::new(0); 2];
        for (sector, entry) in entries.iter_mut().enumerate() {
            let mut raw = [0u8; OTA_SELECT_ENTRY_SIZE];
            self.flash.read(otadata.address + sector as u32 * FLASH_SECTOR_SIZE, &mut raw)?;
            *entry = SelectEntry::decode(&raw);
        }
        Ok(entries)
    }
}

impl<'a, F: FlashDriver> BootPointerStore for OtaDataStore<'a, F> {
    fn running(&mut self) -> Result<PartitionEntry, OtaError> {
        let otadata = match self.otadata() {
            Some(otadata) => otadata,
            None => {
                debug!("No otadata partition, bootloader uses the default app");
                return self.fallback_app();
            }
        };
        let entries = self
            .read_entries(otadata)
            .map_err(|e| OtaError::RunningUnknown(e.to_string()))?;
        let count = self.slot_count();
        let active = match active_sector(&entries) {
            Some(active) if count > 0 => entries[active],
            _ => return self.fallback_app(),
        };
        let index = ((active.seq - 1) % count) as u8;
        debug!("otadata seq {} selects ota_{}", active.seq, index);
        self.catalog
            .find_first(Some(PartitionType::App), Some(PartitionSubtype::Ota(index)), None)
            .cloned()
            .ok_or_else(|| OtaError::RunningUnknown(format!("otadata selects missing slot ota_{}", index)))
    }

    fn set_next(&mut self, target: &PartitionEntry) -> Result<(), DriverError> {
        let otadata = self
            .otadata()
            .ok_or_else(|| DriverError::Device("no otadata partition".to_string()))?;
        if otadata.size < 2 * FLASH_SECTOR_SIZE {
            return Err(DriverError::Device(format!("otadata is only {} bytes", otadata.size)));
        }
        match (target.ty, target.subtype) {
            (PartitionType::App, PartitionSubtype::Factory) => {
                info!("Erasing otadata, next boot uses the factory app");
                self.flash.erase_region(otadata.address, 2 * FLASH_SECTOR_SIZE)
            }
            (PartitionType::App, PartitionSubtype::Ota(index)) => {
                let count = self.slot_count();
                if index as u32 >= count {
                    return Err(DriverError::Device(format!("ota_{} is beyond the {} OTA slots", index, count)));
                }
                let entries = self.read_entries(otadata)?;
                let active = active_sector(&entries);
                let current = active.map_or(0, |sector| entries[sector].seq);
                let sector = active.map_or(0, |sector| sector ^ 1);
                let seq = next_seq(current, index as u32, count).ok_or_else(|| {
                    DriverError::Device(format!("otadata sequence {} has no successor for ota_{}", current, index))
                })?;
                let entry = SelectEntry::new(seq);
                let address = otadata.address + sector as u32 * FLASH_SECTOR_SIZE;
                debug!("Writing otadata seq {} to sector {}", entry.seq, sector);
                self.flash.erase_region(address, FLASH_SECTOR_SIZE)?;
                self.flash.write(address, &entry.encode())
            }
            _ => {
                warn!("'{}' is not an app slot", target.label);
                Err(DriverError::Device(format!("'{}' is not bootable", target.label)))
            }
        }
    }
}
