use std::time::Duration;
use log::{error, info, warn};
use crate::abort_window::AbortWindow;
use crate::catalog::PartitionCatalog;
use crate::error::MigrationError;
use crate::flash::FlashDriver;
use crate::partition::{bytes2ieee, PartitionSubtype, PartitionType};
use crate::table::CandidateTableImage;

/// Which reserved partition gates the migration and what it looks like afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationTarget {
    pub label: String,
    pub desired_type: PartitionType,
    pub desired_subtype: PartitionSubtype,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The candidate image now occupies the table region
    Applied,
    /// The target already has the desired identity; nothing was touched
    AlreadyApplied,
}

/// Replaces the table region with a candidate image once the reserved partition
/// has been validated. Holds the flash driver exclusively for the transaction.
pub struct PartitionTableMigrator<'a, F, W> {
    flash: &'a mut F,
    window: &'a mut W,
    table_offset: u32,
    abort_window: Duration,
}

impl<'a, F: FlashDriver, W: AbortWindow> PartitionTableMigrator<'a, F, W> {
    pub fn new(flash: &'a mut F, window: &'a mut W, table_offset: u32, abort_window: Duration) -> Self {
        PartitionTableMigrator {
            flash,
            window,
            table_offset,
            abort_window,
        }
    }

    pub fn migrate(
        &mut self,
        catalog: &PartitionCatalog,
        target: &MigrationTarget,
        image: &CandidateTableImage,
    ) -> Result<MigrationOutcome, MigrationError> {
        let part = match catalog.find_first(None, None, Some(target.label.as_str())) {
            Some(part) => part,
            None => {
                warn!("No partition named '{}' found, abort", target.label);
                return Err(MigrationError::NotFound(target.label.clone()));
            }
        };

        let expected = image.expected_region_size();
        if part.size != expected {
            warn!("Partition size {} does not equal {}, abort", bytes2ieee(part.size as u64), bytes2ieee(expected as u64));
            return Err(MigrationError::SizeMismatch {
                label: part.label.clone(),
                expected,
                actual: part.size,
            });
        }

        if part.ty == target.desired_type && part.subtype == target.desired_subtype {
            warn!("Partition type and subtype already correct, abort");
            return Ok(MigrationOutcome::AlreadyApplied);
        }
        info!("Partition '{}' is {}/{}, migrating to {}/{}",
              part.label, part.ty, part.subtype, target.desired_type, target.desired_subtype);

        self.window.wait("Erasing partition table", self.abort_window);

        info!("Erasing partition table region...");
        if let Err(e) = self.flash.erase_region(self.table_offset, expected) {
            error!("Failed to erase partition table region: {}", e);
            return Err(MigrationError::EraseFailure(e));
        }

        info!("Writing partition table ({} bytes) to 0x{:x}...", image.len(), self.table_offset);
        if let Err(e) = self.flash.write(self.table_offset, image.bytes()) {
            error!("Failed to write partition table: {}", e);
            return Err(MigrationError::WriteFailure(e));
        }
        info!("Partition table written successfully.");
        Ok(MigrationOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PARTITION_TABLE_OFFSET;
    use crate::error::DriverError;
    use crate::partition::PartitionEntry;

    #[derive(Debug, PartialEq)]
    enum Call {
        Erase(u32, u32),
        Write(u32, usize),
    }

    #[derive(Default)]
    struct RecordingFlash {
        calls: Vec<Call>,
        fail_erase: bool,
        fail_write: bool,
    }

    impl FlashDriver for RecordingFlash {
        fn read(&mut self, _offset: u32, _buf: &mut [u8]) -> Result<(), DriverError> {
            Ok(())
        }
        fn erase_region(&mut self, offset: u32, len: u32) -> Result<(), DriverError> {
            self.calls.push(Call::Erase(offset, len));
            if self.fail_erase {
                return Err(DriverError::Device("erase timeout".to_string()));
            }
            Ok(())
        }
        fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), DriverError> {
            self.calls.push(Call::Write(offset, data.len()));
            if self.fail_write {
                return Err(DriverError::Device("program verify".to_string()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingWindow {
        waits: Vec<Duration>,
    }

    impl AbortWindow for RecordingWindow {
        fn wait(&mut self, _action: &str, duration: Duration) {
            self.waits.push(duration);
        }
    }

    fn catalog_with(subtype: PartitionSubtype, size: u32) -> PartitionCatalog {
        PartitionCatalog::new(vec![
            PartitionEntry::new("nvs", PartitionType::Data, PartitionSubtype::Nvs, 0x9000, 0x4000),
            PartitionEntry::new("homekit", PartitionType::Data, subtype, 0xd000, size),
            PartitionEntry::new("factory", PartitionType::App, PartitionSubtype::Factory, 0x10000, 0x100000),
        ])
    }

    fn homekit_target() -> MigrationTarget {
        MigrationTarget {
            label: "homekit".to_string(),
            desired_type: PartitionType::Data,
            desired_subtype: PartitionSubtype::Homekit,
        }
    }

    fn run(
        flash: &mut RecordingFlash,
        window: &mut RecordingWindow,
        catalog: &PartitionCatalog,
        target: &MigrationTarget,
    ) -> Result<MigrationOutcome, MigrationError> {
        let image = CandidateTableImage::new(vec![0x5A; 4096]).unwrap();
        PartitionTableMigrator::new(flash, window, PARTITION_TABLE_OFFSET, Duration::from_secs(1))
            .migrate(catalog, target, &image)
    }

    #[test]
    fn fresh_device_erases_then_writes() {
        let mut flash = RecordingFlash::default();
        let mut window = RecordingWindow::default();
        let catalog = catalog_with(PartitionSubtype::Custom(0x06), 4096);
        let outcome = run(&mut flash, &mut window, &catalog, &homekit_target()).unwrap();
        assert_eq!(outcome, MigrationOutcome::Applied);
        assert_eq!(flash.calls, vec![Call::Erase(0x8000, 4096), Call::Write(0x8000, 4096)]);
        assert_eq!(window.waits, vec![Duration::from_secs(1)]);
    }

    #[test]
    fn already_migrated_touches_nothing() {
        let mut flash = RecordingFlash::default();
        let mut window = RecordingWindow::default();
        let catalog = catalog_with(PartitionSubtype::Homekit, 4096);
        let outcome = run(&mut flash, &mut window, &catalog, &homekit_target()).unwrap();
        assert_eq!(outcome, MigrationOutcome::AlreadyApplied);
        assert!(flash.calls.is_empty());
        assert!(window.waits.is_empty());
    }

    #[test]
    fn second_run_on_migrated_table_is_a_no_op() {
        let mut flash = RecordingFlash::default();
        let mut window = RecordingWindow::default();
        let catalog = catalog_with(PartitionSubtype::Custom(0x06), 4096);
        run(&mut flash, &mut window, &catalog, &homekit_target()).unwrap();
        let writes = flash.calls.len();

        // the table now describes the reserved partition with its new identity
        let migrated = catalog_with(PartitionSubtype::Homekit, 4096);
        let outcome = run(&mut flash, &mut window, &migrated, &homekit_target()).unwrap();
        assert_eq!(outcome, MigrationOutcome::AlreadyApplied);
        assert_eq!(flash.calls.len(), writes);
    }

    #[test]
    fn size_gate_blocks_any_flash_access() {
        for size in [0x800, 0x2000, 0x1001] {
            let mut flash = RecordingFlash::default();
            let mut window = RecordingWindow::default();
            let catalog = catalog_with(PartitionSubtype::Custom(0x06), size);
            let err = run(&mut flash, &mut window, &catalog, &homekit_target()).unwrap_err();
            assert!(matches!(err, MigrationError::SizeMismatch { expected: 4096, actual, .. } if actual == size));
            assert!(!err.is_fatal());
            assert!(flash.calls.is_empty());
        }
    }

    #[test]
    fn size_gate_runs_before_identity_check() {
        let mut flash = RecordingFlash::default();
        let mut window = RecordingWindow::default();
        let catalog = catalog_with(PartitionSubtype::Homekit, 2048);
        let err = run(&mut flash, &mut window, &catalog, &homekit_target()).unwrap_err();
        assert!(matches!(err, MigrationError::SizeMismatch { .. }));
    }

    #[test]
    fn missing_target_is_not_found() {
        let mut flash = RecordingFlash::default();
        let mut window = RecordingWindow::default();
        let catalog = catalog_with(PartitionSubtype::Custom(0x06), 4096);
        let target = MigrationTarget { label: "fctry".to_string(), ..homekit_target() };
        let err = run(&mut flash, &mut window, &catalog, &target).unwrap_err();
        assert!(matches!(err, MigrationError::NotFound(ref label) if label == "fctry"));
        assert!(flash.calls.is_empty());
    }

    #[test]
    fn erase_failure_stops_before_write() {
        let mut flash = RecordingFlash { fail_erase: true, ..Default::default() };
        let mut window = RecordingWindow::default();
        let catalog = catalog_with(PartitionSubtype::Custom(0x06), 4096);
        let err = run(&mut flash, &mut window, &catalog, &homekit_target()).unwrap_err();
        assert!(matches!(err, MigrationError::EraseFailure(_)));
        assert!(err.is_fatal());
        assert_eq!(flash.calls, vec![Call::Erase(0x8000, 4096)]);
    }

    #[test]
    fn write_failure_is_fatal_and_not_retried() {
        let mut flash = RecordingFlash { fail_write: true, ..Default::default() };
        let mut window = RecordingWindow::default();
        let catalog = catalog_with(PartitionSubtype::Custom(0x06), 4096);
        let err = run(&mut flash, &mut window, &catalog, &homekit_target()).unwrap_err();
        assert!(matches!(err, MigrationError::WriteFailure(_)));
        assert!(err.is_fatal());
        assert_eq!(flash.calls.len(), 2);
    }
}
