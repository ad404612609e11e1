use std::fmt;
use crate::constants::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionType {
    App,
    Data,
    Other(u8),
}

impl PartitionType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => PartitionType::App,
            0x01 => PartitionType::Data,
            other => PartitionType::Other(other),
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            PartitionType::App => 0x00,
            PartitionType::Data => 0x01,
            PartitionType::Other(raw) => raw,
        }
    }

    /// Parse a type name as written in config files or on the command line
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "app" => Some(PartitionType::App),
            "data" => Some(PartitionType::Data),
            other => parse_number(other).map(PartitionType::from_raw),
        }
    }
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PartitionType::App => write!(f, "app"),
            PartitionType::Data => write!(f, "data"),
            PartitionType::Other(raw) => write!(f, "0x{:02x}", raw),
        }
    }
}

/// Subtype of a partition, meaningful only together with its type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionSubtype {
    Factory,
    Ota(u8),
    Test,
    OtaData,
    Phy,
    Nvs,
    CoreDump,
    NvsKeys,
    Efuse,
    Homekit,
    Fat,
    Spiffs,
    LittleFs,
    Custom(u8),
}

impl PartitionSubtype {
    pub fn from_raw(ty: PartitionType, raw: u8) -> Self {
        match ty {
            PartitionType::App => match raw {
                0x00 => PartitionSubtype::Factory,
                APP_SUBTYPE_OTA_MIN..=APP_SUBTYPE_OTA_MAX => {
                    PartitionSubtype::Ota(raw - APP_SUBTYPE_OTA_MIN)
                }
                0x20 => PartitionSubtype::Test,
                other => PartitionSubtype::Custom(other),
            },
            PartitionType::Data => match raw {
                0x00 => PartitionSubtype::OtaData,
                0x01 => PartitionSubtype::Phy,
                0x02 => PartitionSubtype::Nvs,
                0x03 => PartitionSubtype::CoreDump,
                0x04 => PartitionSubtype::NvsKeys,
                0x05 => PartitionSubtype::Efuse,
                DATA_SUBTYPE_HOMEKIT => PartitionSubtype::Homekit,
                0x81 => PartitionSubtype::Fat,
                0x82 => PartitionSubtype::Spiffs,
                0x83 => PartitionSubtype::LittleFs,
                other => PartitionSubtype::Custom(other),
            },
            PartitionType::Other(_) => PartitionSubtype::Custom(raw),
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            PartitionSubtype::Factory => 0x00,
            PartitionSubtype::Ota(n) => APP_SUBTYPE_OTA_MIN + n,
            PartitionSubtype::Test => 0x20,
            PartitionSubtype::OtaData => 0x00,
            PartitionSubtype::Phy => 0x01,
            PartitionSubtype::Nvs => 0x02,
            PartitionSubtype::CoreDump => 0x03,
            PartitionSubtype::NvsKeys => 0x04,
            PartitionSubtype::Efuse => 0x05,
            PartitionSubtype::Homekit => DATA_SUBTYPE_HOMEKIT,
            PartitionSubtype::Fat => 0x81,
            PartitionSubtype::Spiffs => 0x82,
            PartitionSubtype::LittleFs => 0x83,
            PartitionSubtype::Custom(raw) => raw,
        }
    }

    /// Parse a subtype name scoped to `ty`, e.g. `ota_1` for app or `nvs` for data
    pub fn parse(ty: PartitionType, name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if let Some(raw) = parse_number(&name) {
            return Some(PartitionSubtype::from_raw(ty, raw));
        }
        let subtype = match (ty, name.as_str()) {
            (PartitionType::App, "factory") => PartitionSubtype::Factory,
            (PartitionType::App, "test") => PartitionSubtype::Test,
            (PartitionType::App, ota) if ota.starts_with("ota_") => {
                let n: u8 = ota["ota_".len()..].parse().ok()?;
                if n > APP_SUBTYPE_OTA_MAX - APP_SUBTYPE_OTA_MIN {
                    return None;
                }
                PartitionSubtype::Ota(n)
            }
            (PartitionType::Data, "ota") => PartitionSubtype::OtaData,
            (PartitionType::Data, "phy") => PartitionSubtype::Phy,
            (PartitionType::Data, "nvs") => PartitionSubtype::Nvs,
            (PartitionType::Data, "coredump") => PartitionSubtype::CoreDump,
            (PartitionType::Data, "nvs_keys") => PartitionSubtype::NvsKeys,
            (PartitionType::Data, "efuse") => PartitionSubtype::Efuse,
            (PartitionType::Data, "homekit") => PartitionSubtype::Homekit,
            (PartitionType::Data, "fat") => PartitionSubtype::Fat,
            (PartitionType::Data, "spiffs") => PartitionSubtype::Spiffs,
            (PartitionType::Data, "littlefs") => PartitionSubtype::LittleFs,
            _ => return None,
        };
        Some(subtype)
    }

    /// Subtypes a table may contain at most once
    pub fn is_singleton(self) -> bool {
        matches!(
            self,
            PartitionSubtype::OtaData
                | PartitionSubtype::Phy
                | PartitionSubtype::Nvs
                | PartitionSubtype::CoreDump
                | PartitionSubtype::NvsKeys
                | PartitionSubtype::Efuse
        )
    }
}

impl fmt::Display for PartitionSubtype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PartitionSubtype::Ota(n) => return write!(f, "ota_{}", n),
            PartitionSubtype::Custom(raw) => return write!(f, "0x{:02x}", raw),
            PartitionSubtype::Factory => "factory",
            PartitionSubtype::Test => "test",
            PartitionSubtype::OtaData => "ota",
            PartitionSubtype::Phy => "phy",
            PartitionSubtype::Nvs => "nvs",
            PartitionSubtype::CoreDump => "coredump",
            PartitionSubtype::NvsKeys => "nvs_keys",
            PartitionSubtype::Efuse => "efuse",
            PartitionSubtype::Homekit => "homekit",
            PartitionSubtype::Fat => "fat",
            PartitionSubtype::Spiffs => "spiffs",
            PartitionSubtype::LittleFs => "littlefs",
        };
        write!(f, "{}", name)
    }
}

/// One row of the partition table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    pub label: String,
    pub ty: PartitionType,
    pub subtype: PartitionSubtype,
    pub address: u32,
    pub size: u32,
    pub flags: u32,
}

impl PartitionEntry {
    pub fn new(label: &str, ty: PartitionType, subtype: PartitionSubtype, address: u32, size: u32) -> Self {
        PartitionEntry {
            label: label.to_string(),
            ty,
            subtype,
            address,
            size,
            flags: 0,
        }
    }

    /// Last byte covered by the partition
    pub fn end(&self) -> u64 {
        self.address as u64 + self.size as u64 - 1
    }

    pub fn ota_index(&self) -> Option<u8> {
        match (self.ty, self.subtype) {
            (PartitionType::App, PartitionSubtype::Ota(n)) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for PartitionEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "type {}, subtype {}, label '{}' at offset 0x{:x} with size {}",
               self.ty, self.subtype, self.label, self.address, bytes2ieee(self.size as u64))
    }
}

fn parse_number(s: &str) -> Option<u8> {
    match s.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

///Takes a size and converts this to a size in IEEE-1541-2002 units (KiB, MiB, GiB),precision 1
pub fn bytes2ieee(size: u64) -> String {
    let units = ["B", "KiB", "MiB", "GiB"];
    let mut size = size as f64;
    let mut i = 0;
    while size >= 1024.0 && i < units.len() - 1 {
        size /= 1024.0;
        i += 1;
    }
    format!("{:.1}{}", size, units[i])
}
