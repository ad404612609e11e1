use thiserror::Error;

/// Failure reported by a flash driver or boot-pointer collaborator
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("range 0x{offset:x}+0x{len:x} is outside the flash ({capacity} bytes)")]
    OutOfBounds { offset: u32, len: u32, capacity: u32 },

    #[error("range 0x{offset:x}+0x{len:x} is not aligned to {align} byte sectors")]
    Unaligned { offset: u32, len: u32, align: u32 },

    #[error("device rejected operation: {0}")]
    Device(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Decoding or layout problem in a partition table image
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TableError {
    #[error("table image is {0} bytes, more than the {1} byte region")]
    TooLarge(usize, usize),

    #[error("row {0} has no partition magic")]
    BadMagic(usize),

    #[error("table holds {0} entries, the limit is {1}")]
    TooManyEntries(usize, usize),

    #[error("table has no partition entries")]
    Empty,

    #[error("label '{0}' is longer than 16 bytes")]
    LabelTooLong(String),

    #[error("partition '{first}' {how} partition '{second}'")]
    Overlap {
        first: String,
        second: String,
        how: &'static str,
    },

    #[error("MD5 row {0} does not match the rows before it")]
    Md5Mismatch(usize),

    #[error("partition '{label}' at 0x{address:x} is not aligned to 0x{align:x}")]
    Misaligned { label: String, address: u32, align: u32 },

    #[error("partition '{label}' has zero size")]
    ZeroSize { label: String },

    #[error("more than one '{0}' partition")]
    DuplicateSingleton(String),
}

/// The live table could not be read; fatal for everything downstream
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("partition table unreadable: {0}")]
    Unreadable(#[from] DriverError),

    #[error("partition table corrupt: {0}")]
    Corrupt(#[from] TableError),
}

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("no partition labelled '{0}'")]
    NotFound(String),

    #[error("partition '{label}' is {actual} bytes, expected {expected}")]
    SizeMismatch {
        label: String,
        expected: u32,
        actual: u32,
    },

    #[error("erasing the partition table region failed, region state undefined: {0}")]
    EraseFailure(#[source] DriverError),

    #[error("writing the partition table failed, region is erased and unparseable: {0}")]
    WriteFailure(#[source] DriverError),
}

impl MigrationError {
    /// Erase and write failures leave the table region unsafe
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MigrationError::EraseFailure(_) | MigrationError::WriteFailure(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum OtaError {
    #[error("running slot could not be determined: {0}")]
    RunningUnknown(String),

    #[error("no alternate OTA slot besides '{0}'")]
    NoAlternateSlot(String),

    #[error("persisting boot slot '{label}' failed: {source}")]
    BootCommitFailure {
        label: String,
        #[source]
        source: DriverError,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read config file failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse config file failed: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config failed: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Aggregate error for the top-level flows in the crate root
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Ota(#[from] OtaError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Whether the flash may be left in a state that needs reflashing
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Migration(e) => e.is_fatal(),
            Error::Catalog(_) => true,
            _ => false,
        }
    }
}
