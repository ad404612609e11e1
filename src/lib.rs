pub mod abort_window;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod error;
pub mod flash;
pub mod migrator;
pub mod ota;
pub mod ota_data;
pub mod partition;
pub mod table;
mod math_support;

use log::{error, info, warn};
use abort_window::AbortWindow;
use catalog::PartitionCatalog;
use config::Config;
use constants::FLASH_SECTOR_SIZE;
use error::{Error, MigrationError};
use flash::FlashDriver;
use migrator::{MigrationOutcome, MigrationTarget, PartitionTableMigrator};
use ota::{OtaBootSelector, Restarter};
use ota_data::OtaDataStore;
use partition::{PartitionEntry, PartitionSubtype, PartitionType};
use table::{CandidateTableImage, PartitionTable};

/// Read the live table and log every partition matching the filters
pub fn list_partitions<F: FlashDriver>(
    flash: &mut F,
    table_offset: u32,
    ty: Option<PartitionType>,
    subtype: Option<PartitionSubtype>,
    label: Option<&str>,
) -> Result<Vec<PartitionEntry>, Error> {
    let catalog = PartitionCatalog::load(flash, table_offset)?;
    let found: Vec<PartitionEntry> = catalog.enumerate(ty, subtype, label).cloned().collect();
    for entry in &found {
        info!("\tfound partition with {}", entry);
    }
    info!("{} of {} partitions matched", found.len(), catalog.len());
    Ok(found)
}

/// Result of checking a candidate image without touching flash
#[derive(Debug, Default)]
pub struct CheckReport {
    pub entries: usize,
    pub problems: Vec<String>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Check candidate image against the target, and against the live table when given
pub fn check_candidate_image(
    image: &CandidateTableImage,
    target: &MigrationTarget,
    live: Option<&PartitionCatalog>,
) -> Result<CheckReport, Error> {
    let table = PartitionTable::from_bytes(image.bytes())?;
    table.validate()?;
    let candidate = PartitionCatalog::new(table.into_entries());
    let mut report = CheckReport { entries: candidate.len(), problems: Vec::new() };

    // 1 the new table must describe the target with its new identity
    match candidate.find_first(None, None, Some(target.label.as_str())) {
        Some(entry) if entry.ty == target.desired_type && entry.subtype == target.desired_subtype => {
            info!("\t1 Pass: candidate describes '{}' as {}/{}", entry.label, entry.ty, entry.subtype);
        }
        Some(entry) => report.problems.push(format!(
            "candidate describes '{}' as {}/{}, not {}/{}; the migration would repeat on every boot",
            entry.label, entry.ty, entry.subtype, target.desired_type, target.desired_subtype
        )),
        None => report.problems.push(format!("candidate has no partition '{}'", target.label)),
    }

    // 2 the live table must let the migration through the size gate
    if let Some(live) = live {
        match live.find_first(None, None, Some(target.label.as_str())) {
            Some(entry) if entry.size == image.expected_region_size() => {
                info!("\t2 Pass: live '{}' is {} bytes", entry.label, entry.size);
            }
            Some(entry) => report.problems.push(format!(
                "live '{}' is {} bytes, the migration needs {}",
                entry.label, entry.size, FLASH_SECTOR_SIZE
            )),
            None => report.problems.push(format!("live table has no partition '{}'", target.label)),
        }
    }

    for problem in &report.problems {
        warn!("\tError: {}", problem);
    }
    Ok(report)
}

/// Load the live table and run the migrator against it
pub fn run_migration<F: FlashDriver, W: AbortWindow>(
    flash: &mut F,
    window: &mut W,
    config: &Config,
    image: &CandidateTableImage,
) -> Result<MigrationOutcome, Error> {
    let target = config.migration.target()?;
    let catalog = PartitionCatalog::load(flash, config.table.offset)?;
    catalog.log_partitions();
    let outcome = PartitionTableMigrator::new(flash, window, config.table.offset, config.migration.abort_window())
        .migrate(&catalog, &target, image)?;
    Ok(outcome)
}

/// Switch the boot slot using the otadata partition of the live table
///
/// Restarts through `restarter` on success, so it only returns the reason
/// the switch stopped.
pub fn run_boot_switch<F: FlashDriver, W: AbortWindow, R: Restarter>(
    flash: &mut F,
    window: &mut W,
    restarter: &mut R,
    config: &Config,
) -> Error {
    let catalog = match PartitionCatalog::load(flash, config.table.offset) {
        Ok(catalog) => catalog,
        Err(e) => return e.into(),
    };
    let store = OtaDataStore::new(flash, &catalog);
    let mut selector = OtaBootSelector::new(&catalog, store);
    selector.switch_boot_slot(window, restarter, config.ota.restart_delay()).into()
}

#[derive(Debug)]
pub struct RunReport {
    pub migration: Result<MigrationOutcome, MigrationError>,
    /// Why no restart happened, when the boot switch ran
    pub boot_switch: Option<Error>,
}

/// The whole sequence: migrate, then optionally switch the boot slot
///
/// Fatal migration failures stop everything and are returned as `Err`.
pub fn run<F: FlashDriver, W: AbortWindow, R: Restarter>(
    flash: &mut F,
    window: &mut W,
    restarter: &mut R,
    config: &Config,
    image: &CandidateTableImage,
) -> Result<RunReport, Error> {
    let migration = match run_migration(flash, window, config, image) {
        Ok(outcome) => Ok(outcome),
        Err(Error::Migration(e)) if !e.is_fatal() => Err(e),
        Err(e) => {
            error!("Halting: {}", e);
            return Err(e);
        }
    };
    if !config.ota.enabled {
        return Ok(RunReport { migration, boot_switch: None });
    }
    let stopped = run_boot_switch(flash, window, restarter, config);
    warn!("Boot slot not switched: {}", stopped);
    Ok(RunReport { migration, boot_switch: Some(stopped) })
}
