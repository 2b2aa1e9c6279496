//! Scanner data acquisition
//!
//! The acquisition loop runs on its own OS thread, owns the PLC connection
//! pool exclusively and never waits on the router or analysis contexts.

pub mod counters;
mod worker;

pub use counters::{counter_delta, CounterDeltas, CounterTracker, ResetOutcome, ResetReason};
pub use worker::{AcquisitionCommand, AcquisitionExit, AcquisitionLoop};

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Flags and counters shared between the acquisition thread and the rest of
/// the process. Written only by the acquisition thread, except the two
/// control flags.
#[derive(Debug)]
pub struct AcquisitionShared {
    /// Cleared to stop the loop at the next cycle boundary
    pub running: AtomicBool,
    /// Operator measurement switch
    pub measurement_enabled: AtomicBool,
    /// True while a live PLC link is held
    pub connected: AtomicBool,

    pub cycles: AtomicU64,
    pub samples_published: AtomicU64,
    pub samples_dropped: AtomicU64,
    pub io_errors: AtomicU64,
    /// Successful connections, the first one included
    pub reconnects: AtomicU64,
    pub counter_resets: AtomicU64,
    pub failed_resets: AtomicU64,
    pub overruns: AtomicU64,
    pub commands_applied: AtomicU64,
    pub total_lumps: AtomicU64,
    pub total_necks: AtomicU64,
}

impl Default for AcquisitionShared {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(true),
            measurement_enabled: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            samples_published: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            io_errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            counter_resets: AtomicU64::new(0),
            failed_resets: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            commands_applied: AtomicU64::new(0),
            total_lumps: AtomicU64::new(0),
            total_necks: AtomicU64::new(0),
        }
    }
}

impl AcquisitionShared {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn set_measurement_enabled(&self, enabled: bool) {
        self.measurement_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn measurement_enabled(&self) -> bool {
        self.measurement_enabled.load(Ordering::Relaxed)
    }

    /// Point-in-time copy for the status surface.
    pub fn snapshot(&self) -> AcquisitionStats {
        AcquisitionStats {
            running: self.is_running(),
            measurement_enabled: self.measurement_enabled(),
            connected: self.is_connected(),
            cycles: self.cycles.load(Ordering::Relaxed),
            samples_published: self.samples_published.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            counter_resets: self.counter_resets.load(Ordering::Relaxed),
            failed_resets: self.failed_resets.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            commands_applied: self.commands_applied.load(Ordering::Relaxed),
            total_lumps: self.total_lumps.load(Ordering::Relaxed),
            total_necks: self.total_necks.load(Ordering::Relaxed),
        }
    }
}

/// Serializable acquisition counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AcquisitionStats {
    pub running: bool,
    pub measurement_enabled: bool,
    pub connected: bool,
    pub cycles: u64,
    pub samples_published: u64,
    pub samples_dropped: u64,
    pub io_errors: u64,
    pub reconnects: u64,
    pub counter_resets: u64,
    pub failed_resets: u64,
    pub overruns: u64,
    pub commands_applied: u64,
    pub total_lumps: u64,
    pub total_necks: u64,
}
