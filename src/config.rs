use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::constants::*;
use crate::error::ConfigError;
use crate::migrator::MigrationTarget;
use crate::partition::{PartitionSubtype, PartitionType};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub table: TableConfig,
    pub migration: MigrationConfig,
    pub ota: OtaConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub offset: u32,
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig { offset: PARTITION_TABLE_OFFSET }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub target_label: String,
    pub desired_type: String,
    pub desired_subtype: String,
    pub abort_window_ms: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig {
            target_label: DEFAULT_TARGET_LABEL.to_string(),
            desired_type: "data".to_string(),
            desired_subtype: "homekit".to_string(),
            abort_window_ms: DEFAULT_ABORT_WINDOW_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    pub enabled: bool,
    pub restart_delay_ms: u64,
}

impl Default for OtaConfig {
    fn default() -> Self {
        OtaConfig {
            enabled: false,
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
        }
    }
}

impl Config {
    pub fn from_toml_str(data: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Config::from_toml_str(&data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.offset % FLASH_SECTOR_SIZE != 0 {
            return Err(ConfigError::Invalid(format!(
                "table offset 0x{:x} is not sector aligned", self.table.offset
            )));
        }
        if self.migration.target_label.is_empty() || self.migration.target_label.len() > PARTITION_LABEL_LEN {
            return Err(ConfigError::Invalid(format!(
                "target label '{}' must be 1-16 bytes", self.migration.target_label
            )));
        }
        self.migration.target().map(|_| ())
    }
}

impl MigrationConfig {
    /// Resolve the configured names into a typed migration target
    pub fn target(&self) -> Result<MigrationTarget, ConfigError> {
        let desired_type = PartitionType::parse(&self.desired_type)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown partition type '{}'", self.desired_type)))?;
        let desired_subtype = PartitionSubtype::parse(desired_type, &self.desired_subtype).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "unknown subtype '{}' for type {}", self.desired_subtype, desired_type
            ))
        })?;
        Ok(MigrationTarget {
            label: self.target_label.clone(),
            desired_type,
            desired_subtype,
        })
    }

    pub fn abort_window(&self) -> Duration {
        Duration::from_millis(self.abort_window_ms)
    }
}

impl OtaConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// Generate a template config file holding the defaults
pub fn generate_template_config_file(path: &Path) -> Result<(), ConfigError> {
    let toml = toml::to_string(&Config::default())?;
    let mut file = fs::File::create(path)?;
    file.write_all(b"# The migration runs once: when the target partition already has the desired\n")?;
    file.write_all(b"# type and subtype nothing is erased. The candidate table must describe the\n")?;
    file.write_all(b"# target that way, otherwise every boot rewrites the table again.\n")?;
    file.write_all(b"# abort_window_ms and restart_delay_ms give you time to reset before\n")?;
    file.write_all(b"# the irreversible step, 0 disables the pause.\n\n")?;
    file.write_all(toml.as_bytes())?;
    Ok(())
}
