use std::time::Duration;
use log::{error, info, warn};
use crate::abort_window::AbortWindow;
use crate::catalog::PartitionCatalog;
use crate::error::{DriverError, OtaError};
use crate::partition::{PartitionEntry, PartitionType};

/// Persistent record the bootloader uses to pick the app slot
pub trait BootPointerStore {
    /// The slot the bootloader selected for the current boot
    fn running(&mut self) -> Result<PartitionEntry, OtaError>;
    /// Select `target` for the following boot
    fn set_next(&mut self, target: &PartitionEntry) -> Result<(), DriverError>;
}

pub trait Restarter {
    fn restart(&mut self) -> !;
}

/// Ends the host process, the closest thing a flash image has to a reset
#[derive(Debug, Default)]
pub struct ProcessRestart;

impl Restarter for ProcessRestart {
    fn restart(&mut self) -> ! {
        info!("Restarting now");
        std::process::exit(0)
    }
}

/// Picks and persists the app slot for the next boot in an A/B scheme
pub struct OtaBootSelector<'c, S> {
    catalog: &'c PartitionCatalog,
    store: S,
}

impl<'c, S: BootPointerStore> OtaBootSelector<'c, S> {
    pub fn new(catalog: &'c PartitionCatalog, store: S) -> Self {
        OtaBootSelector { catalog, store }
    }

    pub fn running_partition(&mut self) -> Result<PartitionEntry, OtaError> {
        let running = self.store.running()?;
        info!("Running partition: {}", running);
        Ok(running)
    }

    /// The OTA app slot after `running` in slot order, wrapping around
    ///
    /// A running factory app selects the first OTA slot. Never returns `running`.
    pub fn next_update_partition(&self, running: &PartitionEntry) -> Option<&'c PartitionEntry> {
        let slots: Vec<&PartitionEntry> = self
            .catalog
            .enumerate(Some(PartitionType::App), None, None)
            .filter(|entry| entry.ota_index().is_some())
            .collect();
        let start = slots
            .iter()
            .position(|slot| slot.address == running.address)
            .map_or(0, |pos| pos + 1);
        (0..slots.len())
            .map(|i| slots[(start + i) % slots.len()])
            .find(|slot| slot.address != running.address)
    }

    pub fn commit_boot_partition(&mut self, target: &PartitionEntry) -> Result<(), OtaError> {
        match self.store.set_next(target) {
            Ok(()) => {
                info!("Boot partition set to '{}'", target.label);
                Ok(())
            }
            Err(source) => {
                error!("Failed to set boot partition '{}': {}", target.label, source);
                Err(OtaError::BootCommitFailure { label: target.label.clone(), source })
            }
        }
    }

    /// Only call after a successful commit
    pub fn restart_after_delay<W: AbortWindow, R: Restarter>(
        &self,
        window: &mut W,
        restarter: &mut R,
        delay: Duration,
    ) -> ! {
        window.wait("Restarting", delay);
        restarter.restart()
    }

    /// Run the whole switch; returns only when no restart happened
    pub fn switch_boot_slot<W: AbortWindow, R: Restarter>(
        &mut self,
        window: &mut W,
        restarter: &mut R,
        delay: Duration,
    ) -> OtaError {
        let running = match self.running_partition() {
            Ok(running) => running,
            Err(e) => return e,
        };
        let next = match self.next_update_partition(&running) {
            Some(next) => next,
            None => {
                warn!("No alternate OTA slot besides '{}', not switching", running.label);
                return OtaError::NoAlternateSlot(running.label);
            }
        };
        info!("Next boot partition: {}", next);
        if let Err(e) = self.commit_boot_partition(next) {
            return e;
        }
        self.restart_after_delay(window, restarter, delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionSubtype;
    use std::cell::RefCell;
    use std::panic::{self, AssertUnwindSafe};
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        SetNext(String),
        Wait(Duration),
        Restart,
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct FakeStore {
        running: PartitionEntry,
        fail_commit: bool,
        log: Log,
    }

    impl BootPointerStore for FakeStore {
        fn running(&mut self) -> Result<PartitionEntry, OtaError> {
            Ok(self.running.clone())
        }
        fn set_next(&mut self, target: &PartitionEntry) -> Result<(), DriverError> {
            self.log.borrow_mut().push(Event::SetNext(target.label.clone()));
            if self.fail_commit {
                return Err(DriverError::Device("otadata write".to_string()));
            }
            Ok(())
        }
    }

    struct FakeWindow(Log);

    impl AbortWindow for FakeWindow {
        fn wait(&mut self, _action: &str, duration: Duration) {
            self.0.borrow_mut().push(Event::Wait(duration));
        }
    }

    struct PanicRestart(Log);

    impl Restarter for PanicRestart {
        fn restart(&mut self) -> ! {
            self.0.borrow_mut().push(Event::Restart);
            panic!("restart");
        }
    }

    fn slot(n: u8) -> PartitionEntry {
        PartitionEntry::new(
            &format!("ota_{}", n),
            PartitionType::App,
            PartitionSubtype::Ota(n),
            0x10000 + n as u32 * 0x100000,
            0x100000,
        )
    }

    fn factory() -> PartitionEntry {
        PartitionEntry::new("factory", PartitionType::App, PartitionSubtype::Factory, 0x10000, 0x100000)
    }

    fn catalog(apps: Vec<PartitionEntry>) -> PartitionCatalog {
        let mut entries = vec![
            PartitionEntry::new("nvs", PartitionType::Data, PartitionSubtype::Nvs, 0x9000, 0x4000),
            PartitionEntry::new("otadata", PartitionType::Data, PartitionSubtype::OtaData, 0xd000, 0x2000),
        ];
        entries.extend(apps);
        PartitionCatalog::new(entries)
    }

    fn store(running: PartitionEntry, log: &Log) -> FakeStore {
        FakeStore { running, fail_commit: false, log: log.clone() }
    }

    #[test]
    fn slots_alternate() {
        let log = Log::default();
        let table = catalog(vec![slot(0), slot(1)]);
        let selector = OtaBootSelector::new(&table, store(slot(0), &log));
        assert_eq!(selector.next_update_partition(&slot(0)), Some(&slot(1)));
        assert_eq!(selector.next_update_partition(&slot(1)), Some(&slot(0)));
    }

    #[test]
    fn single_slot_has_no_alternate() {
        let log = Log::default();
        let table = catalog(vec![slot(0)]);
        let selector = OtaBootSelector::new(&table, store(slot(0), &log));
        assert_eq!(selector.next_update_partition(&slot(0)), None);

        let no_ota = catalog(vec![]);
        let selector = OtaBootSelector::new(&no_ota, store(slot(0), &log));
        assert_eq!(selector.next_update_partition(&slot(0)), None);
    }

    #[test]
    fn three_slots_cycle_and_factory_starts_at_first() {
        let log = Log::default();
        let mut apps = vec![factory()];
        apps.extend((0..3).map(|n| {
            let mut s = slot(n);
            s.address += 0x100000;
            s
        }));
        let table = catalog(apps);
        let ota: Vec<_> = table.enumerate(None, None, None).filter(|e| e.ota_index().is_some()).cloned().collect();
        let selector = OtaBootSelector::new(&table, store(factory(), &log));
        assert_eq!(selector.next_update_partition(&factory()), Some(&ota[0]));
        assert_eq!(selector.next_update_partition(&ota[1]), Some(&ota[2]));
        assert_eq!(selector.next_update_partition(&ota[2]), Some(&ota[0]));
    }

    #[test]
    fn boot_switch_commits_then_restarts_after_delay() {
        let log = Log::default();
        let table = catalog(vec![slot(0), slot(1)]);
        let mut selector = OtaBootSelector::new(&table, store(slot(0), &log));
        let mut window = FakeWindow(log.clone());
        let mut restarter = PanicRestart(log.clone());
        let delay = Duration::from_secs(5);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            selector.switch_boot_slot(&mut window, &mut restarter, delay)
        }));
        assert!(result.is_err(), "switch must not return after a commit");
        assert_eq!(
            *log.borrow(),
            vec![Event::SetNext("ota_1".to_string()), Event::Wait(delay), Event::Restart]
        );
    }

    #[test]
    fn failed_commit_skips_restart() {
        let log = Log::default();
        let table = catalog(vec![slot(0), slot(1)]);
        let mut failing = store(slot(1), &log);
        failing.fail_commit = true;
        let mut selector = OtaBootSelector::new(&table, failing);
        let err = selector.switch_boot_slot(&mut FakeWindow(log.clone()), &mut PanicRestart(log.clone()), Duration::ZERO);
        assert!(matches!(err, OtaError::BootCommitFailure { ref label, .. } if label == "ota_0"));
        assert_eq!(*log.borrow(), vec![Event::SetNext("ota_0".to_string())]);
    }

    #[test]
    fn no_alternate_slot_is_terminal() {
        let log = Log::default();
        let table = catalog(vec![slot(0)]);
        let mut selector = OtaBootSelector::new(&table, store(slot(0), &log));
        let err = selector.switch_boot_slot(&mut FakeWindow(log.clone()), &mut PanicRestart(log.clone()), Duration::ZERO);
        assert!(matches!(err, OtaError::NoAlternateSlot(_)));
        assert!(log.borrow().is_empty());
    }
}
