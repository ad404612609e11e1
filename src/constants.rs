/// Well-known flash offset of the partition table region
pub const PARTITION_TABLE_OFFSET: u32 = 0x8000;
/// Erase unit of the flash driver, also the size of the table region
pub const FLASH_SECTOR_SIZE: u32 = 0x1000;
/// Bytes of the table region that may hold rows, the rest is padding
pub const PARTITION_TABLE_MAX_LEN: usize = 0xC00;
pub const PARTITION_ENTRY_SIZE: usize = 32;
/// One row is always kept for the MD5 record
pub const PARTITION_MAX_ENTRIES: usize = PARTITION_TABLE_MAX_LEN / PARTITION_ENTRY_SIZE - 1;
pub const PARTITION_LABEL_LEN: usize = 16;

pub const PARTITION_ENTRY_MAGIC: [u8; 2] = [0xAA, 0x50];
pub const PARTITION_MD5_MAGIC: [u8; 2] = [0xEB, 0xEB];

/// App partitions must start on a 64K boundary
pub const APP_PARTITION_ALIGNMENT: u32 = 0x10000;

pub const APP_SUBTYPE_OTA_MIN: u8 = 0x10;
pub const APP_SUBTYPE_OTA_MAX: u8 = 0x1F;
/// Reserved data subtype claimed by the HomeKit setup payload partition
pub const DATA_SUBTYPE_HOMEKIT: u8 = 0x2B;

// otadata select entry layout
pub const OTA_SELECT_ENTRY_SIZE: usize = 32;
pub const OTA_SEQ_LABEL_LEN: usize = 20;
pub const OTA_SEQ_ERASED: u32 = 0xFFFF_FFFF;
pub const OTA_IMG_STATE_UNDEFINED: u32 = 0xFFFF_FFFF;
pub const OTA_IMG_STATE_INVALID: u32 = 0x3;
pub const OTA_IMG_STATE_ABORTED: u32 = 0x4;

pub const DEFAULT_TARGET_LABEL: &str = "homekit";
pub const DEFAULT_ABORT_WINDOW_MS: u64 = 1000;
pub const DEFAULT_RESTART_DELAY_MS: u64 = 5000;
