//! Bounded waits placed in front of irreversible steps.
//!
//! The pause gives an operator a chance to reset or reflash the device before
//! the table is erased or the device restarts. It is a capability passed into
//! the core so tests can run without delay.
use std::thread;
use std::time::Duration;
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;

pub trait AbortWindow {
    /// Block for `duration`; `action` names what happens when the window closes
    fn wait(&mut self, action: &str, duration: Duration);
}

/// Skip the window entirely
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWait;

impl AbortWindow for NoWait {
    fn wait(&mut self, _action: &str, _duration: Duration) {}
}

/// Plain sleep, used on headless runs
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepWindow;

impl AbortWindow for SleepWindow {
    fn wait(&mut self, action: &str, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        warn!("{} in {:.1}s, reset now to abort", action, duration.as_secs_f64());
        thread::sleep(duration);
    }
}

/// Countdown spinner on the terminal
#[derive(Debug, Clone, Copy)]
pub struct ProgressWindow {
    tick: Duration,
}

impl Default for ProgressWindow {
    fn default() -> Self {
        ProgressWindow { tick: Duration::from_millis(100) }
    }
}

impl AbortWindow for ProgressWindow {
    fn wait(&mut self, action: &str, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        warn!("{} in {:.1}s, reset now to abort", action, duration.as_secs_f64());
        let steps = (duration.as_millis() / self.tick.as_millis().max(1)).max(1) as u64;
        let pb = ProgressBar::new(steps);
        if let Ok(style) = ProgressStyle::with_template("{spinner:.yellow} {msg} [{bar:30.yellow/red}] {eta}") {
            pb.set_style(style.progress_chars("=> "));
        }
        pb.set_message(action.to_string());
        let step = duration / steps as u32;
        for _ in 0..steps {
            thread::sleep(step);
            pb.inc(1);
        }
        pb.finish_and_clear();
    }
}
