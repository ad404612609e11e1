use log::{debug, info};
use crate::constants::FLASH_SECTOR_SIZE;
use crate::error::{CatalogError, TableError};
use crate::flash::FlashDriver;
use crate::partition::{PartitionEntry, PartitionSubtype, PartitionType};
use crate::table::PartitionTable;

/// Read-only view of the entries described by the live partition table
#[derive(Debug, Clone, Default)]
pub struct PartitionCatalog {
    entries: Vec<PartitionEntry>,
}

impl PartitionCatalog {
    pub fn new(entries: Vec<PartitionEntry>) -> Self {
        PartitionCatalog { entries }
    }

    /// Read and decode the table region at `table_offset`
    ///
    /// A region without a single entry (erased, or an MD5 row first) is corrupt.
    pub fn load<F: FlashDriver>(flash: &mut F, table_offset: u32) -> Result<Self, CatalogError> {
        let mut region = vec![0u8; FLASH_SECTOR_SIZE as usize];
        flash.read(table_offset, &mut region)?;
        let table = PartitionTable::from_bytes(&region)?;
        if table.entries().is_empty() {
            return Err(CatalogError::Corrupt(TableError::Empty));
        }
        debug!("Loaded {} partition entries from 0x{:x}", table.entries().len(), table_offset);
        Ok(PartitionCatalog { entries: table.into_entries() })
    }

    /// Entries matching every filter, in storage order; `None` matches anything
    ///
    /// The iterator only borrows the catalog; dropping it early releases it.
    pub fn enumerate<'a>(
        &'a self,
        ty: Option<PartitionType>,
        subtype: Option<PartitionSubtype>,
        label: Option<&'a str>,
    ) -> impl Iterator<Item = &'a PartitionEntry> + Clone + 'a {
        self.entries.iter().filter(move |entry| matches(entry, ty, subtype, label))
    }

    pub fn find_first(
        &self,
        ty: Option<PartitionType>,
        subtype: Option<PartitionSubtype>,
        label: Option<&str>,
    ) -> Option<&PartitionEntry> {
        self.entries.iter().find(|entry| matches(entry, ty, subtype, label))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Log one line per partition
    pub fn log_partitions(&self) {
        info!("Iterating through partitions...");
        for entry in self.enumerate(None, None, None) {
            info!("\tfound partition with {}", entry);
        }
    }
}

fn matches(
    entry: &PartitionEntry,
    ty: Option<PartitionType>,
    subtype: Option<PartitionSubtype>,
    label: Option<&str>,
) -> bool {
    ty.map_or(true, |ty| entry.ty == ty)
        && subtype.map_or(true, |subtype| entry.subtype == subtype)
        && label.map_or(true, |label| entry.label == label)
}
