//! Partition table binary rows and the candidate image handed to the migrator.
//!
//! Row layout (32 bytes, little endian):
//! `magic[2] type subtype offset:u32 size:u32 label[16] flags:u32`.
//! An MD5 row (`0xEB 0xEB`, 14 bytes 0xFF, digest of the rows before it) or an
//! erased row (`0xFF`) ends the table.
use std::collections::HashSet;
use log::debug;
use md5::{Digest, Md5};
use crate::constants::*;
use crate::error::TableError;
use crate::math_support::{find_first_overlap, Interval};
use crate::partition::{PartitionEntry, PartitionSubtype, PartitionType};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    entries: Vec<PartitionEntry>,
}

impl PartitionTable {
    pub fn new(entries: Vec<PartitionEntry>) -> Self {
        PartitionTable { entries }
    }

    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<PartitionEntry> {
        self.entries
    }

    /// Decode rows until the MD5 row, an erased row or the end of the table area
    ///
    /// A present MD5 row must match the rows before it.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TableError> {
        if data.len() > FLASH_SECTOR_SIZE as usize {
            return Err(TableError::TooLarge(data.len(), FLASH_SECTOR_SIZE as usize));
        }
        let area = &data[..data.len().min(PARTITION_TABLE_MAX_LEN)];
        let mut entries = Vec::new();
        for (index, row) in area.chunks_exact(PARTITION_ENTRY_SIZE).enumerate() {
            let magic = [row[0], row[1]];
            if magic == PARTITION_MD5_MAGIC {
                let digest = Md5::digest(&area[..index * PARTITION_ENTRY_SIZE]);
                if digest.as_slice() != &row[16..] {
                    return Err(TableError::Md5Mismatch(index));
                }
                debug!("MD5 row at {} matches, end of table", index);
                break;
            }
            if row.iter().all(|b| *b == 0xFF) {
                break;
            }
            if magic != PARTITION_ENTRY_MAGIC {
                return Err(TableError::BadMagic(index));
            }
            if entries.len() == PARTITION_MAX_ENTRIES {
                return Err(TableError::TooManyEntries(entries.len() + 1, PARTITION_MAX_ENTRIES));
            }
            entries.push(decode_row(row));
        }
        Ok(PartitionTable { entries })
    }

    /// Encode into a full table region (one sector, padded with 0xFF) closed by the MD5 row
    pub fn to_bytes(&self) -> Result<Vec<u8>, TableError> {
        if self.entries.len() > PARTITION_MAX_ENTRIES {
            return Err(TableError::TooManyEntries(self.entries.len(), PARTITION_MAX_ENTRIES));
        }
        let mut out = vec![0xFF; FLASH_SECTOR_SIZE as usize];
        for (index, entry) in self.entries.iter().enumerate() {
            let row = encode_row(entry)?;
            let start = index * PARTITION_ENTRY_SIZE;
            out[start..start + PARTITION_ENTRY_SIZE].copy_from_slice(&row);
        }
        let md5_row = self.entries.len() * PARTITION_ENTRY_SIZE;
        let digest = Md5::digest(&out[..md5_row]);
        out[md5_row..md5_row + 2].copy_from_slice(&PARTITION_MD5_MAGIC);
        out[md5_row + 16..md5_row + PARTITION_ENTRY_SIZE].copy_from_slice(&digest);
        Ok(out)
    }

    /// Check the layout invariants: non-empty, aligned, no overlap, singleton subtypes unique
    pub fn validate(&self) -> Result<(), TableError> {
        if self.entries.is_empty() {
            return Err(TableError::Empty);
        }
        let mut singletons = HashSet::new();
        let mut intervals = Vec::with_capacity(self.entries.len());
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.label.len() > PARTITION_LABEL_LEN {
                return Err(TableError::LabelTooLong(entry.label.clone()));
            }
            if entry.size == 0 {
                return Err(TableError::ZeroSize { label: entry.label.clone() });
            }
            let align = match entry.ty {
                PartitionType::App => APP_PARTITION_ALIGNMENT,
                _ => FLASH_SECTOR_SIZE,
            };
            if entry.address % align != 0 {
                return Err(TableError::Misaligned {
                    label: entry.label.clone(),
                    address: entry.address,
                    align,
                });
            }
            if entry.subtype.is_singleton() && !singletons.insert((entry.ty, entry.subtype)) {
                return Err(TableError::DuplicateSingleton(entry.subtype.to_string()));
            }
            intervals.push(Interval::new(entry.address as u64, entry.end(), index));
        }
        if let Some((a, b, state)) = find_first_overlap(&mut intervals) {
            return Err(TableError::Overlap {
                first: self.entries[a].label.clone(),
                second: self.entries[b].label.clone(),
                how: state.describe(),
            });
        }
        Ok(())
    }
}

fn decode_row(row: &[u8]) -> PartitionEntry {
    let ty = PartitionType::from_raw(row[2]);
    let subtype = PartitionSubtype::from_raw(ty, row[3]);
    let label_bytes = &row[12..12 + PARTITION_LABEL_LEN];
    let label_len = label_bytes.iter().position(|b| *b == 0).unwrap_or(PARTITION_LABEL_LEN);
    PartitionEntry {
        label: String::from_utf8_lossy(&label_bytes[..label_len]).into_owned(),
        ty,
        subtype,
        address: read_u32(row, 4),
        size: read_u32(row, 8),
        flags: read_u32(row, 28),
    }
}

fn encode_row(entry: &PartitionEntry) -> Result<[u8; PARTITION_ENTRY_SIZE], TableError> {
    let label = entry.label.as_bytes();
    if label.len() > PARTITION_LABEL_LEN {
        return Err(TableError::LabelTooLong(entry.label.clone()));
    }
    let mut row = [0u8; PARTITION_ENTRY_SIZE];
    row[..2].copy_from_slice(&PARTITION_ENTRY_MAGIC);
    row[2] = entry.ty.to_raw();
    row[3] = entry.subtype.to_raw();
    row[4..8].copy_from_slice(&entry.address.to_le_bytes());
    row[8..12].copy_from_slice(&entry.size.to_le_bytes());
    row[12..12 + label.len()].copy_from_slice(label);
    row[28..32].copy_from_slice(&entry.flags.to_le_bytes());
    Ok(row)
}

fn read_u32(row: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([row[at], row[at + 1], row[at + 2], row[at + 3]])
}

/// A full replacement table, opaque to the migrator
#[derive(Debug, Clone)]
pub struct CandidateTableImage {
    bytes: Vec<u8>,
}

impl CandidateTableImage {
    pub fn new(bytes: Vec<u8>) -> Result<Self, TableError> {
        if bytes.len() > FLASH_SECTOR_SIZE as usize {
            return Err(TableError::TooLarge(bytes.len(), FLASH_SECTOR_SIZE as usize));
        }
        Ok(CandidateTableImage { bytes })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Size the reserved partition must have for this image to be applicable
    pub fn expected_region_size(&self) -> u32 {
        FLASH_SECTOR_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PartitionTable {
        PartitionTable::new(vec![
            PartitionEntry::new("nvs", PartitionType::Data, PartitionSubtype::Nvs, 0x9000, 0x4000),
            PartitionEntry::new("otadata", PartitionType::Data, PartitionSubtype::OtaData, 0xd000, 0x2000),
            PartitionEntry::new("homekit", PartitionType::Data, PartitionSubtype::Custom(0x99), 0xf000, 0x1000),
            PartitionEntry::new("ota_0", PartitionType::App, PartitionSubtype::Ota(0), 0x10000, 0x100000),
            PartitionEntry::new("ota_1", PartitionType::App, PartitionSubtype::Ota(1), 0x110000, 0x100000),
        ])
    }

    #[test]
    fn decode_keeps_storage_order() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(bytes.len(), FLASH_SECTOR_SIZE as usize);
        let decoded = PartitionTable::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, sample());
        assert_eq!(decoded.entries()[3].label, "ota_0");
    }

    #[test]
    fn md5_row_closes_the_table() {
        let bytes = sample().to_bytes().unwrap();
        let md5_row = &bytes[5 * PARTITION_ENTRY_SIZE..6 * PARTITION_ENTRY_SIZE];
        assert_eq!(md5_row[..2], PARTITION_MD5_MAGIC);
        assert_eq!(md5_row[2..16], [0xFF; 14]);
        assert_eq!(md5_row[16..], Md5::digest(&bytes[..5 * PARTITION_ENTRY_SIZE])[..]);
        assert!(bytes[6 * PARTITION_ENTRY_SIZE..].iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn decode_rejects_md5_mismatch() {
        let mut bad_digest = sample().to_bytes().unwrap();
        bad_digest[5 * PARTITION_ENTRY_SIZE + 20] ^= 0x01;
        assert_eq!(PartitionTable::from_bytes(&bad_digest), Err(TableError::Md5Mismatch(5)));

        // a row edited after the digest was taken
        let mut edited_row = sample().to_bytes().unwrap();
        edited_row[2 * PARTITION_ENTRY_SIZE + 4] ^= 0x01;
        assert_eq!(PartitionTable::from_bytes(&edited_row), Err(TableError::Md5Mismatch(5)));
    }

    #[test]
    fn table_without_md5_row_still_decodes() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[5 * PARTITION_ENTRY_SIZE..6 * PARTITION_ENTRY_SIZE].fill(0xFF);
        assert_eq!(PartitionTable::from_bytes(&bytes).unwrap(), sample());
    }

    #[test]
    fn decode_rejects_garbage_row() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[PARTITION_ENTRY_SIZE] = 0x12;
        assert_eq!(PartitionTable::from_bytes(&bytes), Err(TableError::BadMagic(1)));
    }

    #[test]
    fn sixteen_byte_label_has_no_terminator() {
        let table = PartitionTable::new(vec![PartitionEntry::new(
            "abcdefghijklmnop", PartitionType::Data, PartitionSubtype::Nvs, 0x9000, 0x1000,
        )]);
        let decoded = PartitionTable::from_bytes(&table.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.entries()[0].label, "abcdefghijklmnop");
    }

    #[test]
    fn validate_layout() {
        assert_eq!(sample().validate(), Ok(()));

        let mut overlapping = sample().into_entries();
        overlapping[2].address = 0xe000;
        assert_eq!(
            PartitionTable::new(overlapping).validate(),
            Err(TableError::Overlap {
                first: "otadata".to_string(),
                second: "homekit".to_string(),
                how: "contains",
            })
        );

        let mut second_nvs = sample().into_entries();
        second_nvs[2].subtype = PartitionSubtype::Nvs;
        assert_eq!(
            PartitionTable::new(second_nvs).validate(),
            Err(TableError::DuplicateSingleton("nvs".to_string()))
        );

        let mut unaligned_app = sample().into_entries();
        unaligned_app[3].address = 0x11000;
        assert!(matches!(
            PartitionTable::new(unaligned_app).validate(),
            Err(TableError::Misaligned { .. })
        ));

        assert_eq!(PartitionTable::default().validate(), Err(TableError::Empty));
    }

    #[test]
    fn candidate_image_is_bounded_by_one_sector() {
        assert!(CandidateTableImage::new(vec![0xFF; 4096]).is_ok());
        assert_eq!(
            CandidateTableImage::new(vec![0xFF; 4097]).unwrap_err(),
            TableError::TooLarge(4097, 4096)
        );
        let image = CandidateTableImage::new(vec![0xAA; 3072]).unwrap();
        assert_eq!(image.expected_region_size(), 4096);
        assert_eq!(image.len(), 3072);
    }
}
