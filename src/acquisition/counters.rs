//! Software tracking of the scanner's lump/neck hardware counters
//!
//! The hardware counters are 16-bit, wrap, and are periodically reset by
//! us. The tracker turns successive raw readings into per-cycle deltas and
//! lifetime totals and decides when the next hardware reset is due.

use serde::Serialize;

/// Per-cycle increment of a raw counter.
///
/// A reading lower than the previous one means the counter wrapped or was
/// reset, and the whole current value is taken as the delta.
pub const fn counter_delta(current: u16, previous: u16) -> u16 {
    if current >= previous {
        current - previous
    } else {
        current
    }
}

/// Deltas computed for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDeltas {
    pub lumps: u32,
    pub necks: u32,
}

/// Why a hardware counter reset is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    /// A raw counter passed the high-water mark
    HighWater,
    /// Counters have not moved for the configured number of cycles
    Stable,
}

/// Result of the assert/clear/verify reset sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// Counters read back as zero
    Cleared { attempts: u32 },
    /// Counters never read back as zero; these are the last values seen
    Failed { lumps: u16, necks: u16 },
}

/// Previous raw readings, lifetime totals and the stability counter.
#[derive(Debug, Clone, Default)]
pub struct CounterTracker {
    prev_lumps: u16,
    prev_necks: u16,
    total_lumps: u64,
    total_necks: u64,
    stable_cycles: u32,
}

impl CounterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one raw reading.
    pub fn update(&mut self, lumps: u16, necks: u16) -> CounterDeltas {
        let deltas = CounterDeltas {
            lumps: u32::from(counter_delta(lumps, self.prev_lumps)),
            necks: u32::from(counter_delta(necks, self.prev_necks)),
        };
        self.prev_lumps = lumps;
        self.prev_necks = necks;
        self.total_lumps += u64::from(deltas.lumps);
        self.total_necks += u64::from(deltas.necks);

        if deltas.lumps == 0 && deltas.necks == 0 {
            self.stable_cycles = self.stable_cycles.saturating_add(1);
        } else {
            self.stable_cycles = 0;
        }
        deltas
    }

    /// Whether the raw readings just passed to [`update`](Self::update) call
    /// for a hardware reset.
    ///
    /// A stability reset is skipped when both counters already read zero.
    pub const fn reset_due(
        &self,
        lumps: u16,
        necks: u16,
        high_water: u16,
        stable_cycles_before_reset: u32,
    ) -> Option<ResetReason> {
        if lumps > high_water || necks > high_water {
            Some(ResetReason::HighWater)
        } else if self.stable_cycles >= stable_cycles_before_reset && (lumps > 0 || necks > 0) {
            Some(ResetReason::Stable)
        } else {
            None
        }
    }

    /// Adopt the result of a reset sequence as the new baseline.
    ///
    /// On success the previous-value trackers are zeroed; on failure the last
    /// post-reset readings become the baseline so software and hardware stay
    /// in step.
    pub fn rebaseline(&mut self, outcome: ResetOutcome) {
        match outcome {
            ResetOutcome::Cleared { .. } => {
                self.prev_lumps = 0;
                self.prev_necks = 0;
            }
            ResetOutcome::Failed { lumps, necks } => {
                self.prev_lumps = lumps;
                self.prev_necks = necks;
            }
        }
        self.stable_cycles = 0;
    }

    pub const fn totals(&self) -> (u64, u64) {
        (self.total_lumps, self.total_necks)
    }

    pub const fn previous(&self) -> (u16, u16) {
        (self.prev_lumps, self.prev_necks)
    }

    pub const fn stable_cycles(&self) -> u32 {
        self.stable_cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_counter_takes_whole_current_value() {
        let mut t = CounterTracker::new();
        t.update(5, 2);
        let d = t.update(3, 4);
        assert_eq!(d, CounterDeltas { lumps: 3, necks: 2 });
        assert_eq!(t.totals(), (8, 4));
    }

    #[test]
    fn delta_law_holds_for_every_reading() {
        let readings: [u16; 10] = [0, 4, 4, 9_000, 65_535, 2, 2, 0, 17, 3];
        let mut t = CounterTracker::new();
        let mut prev = 0u16;
        let mut total = 0u64;
        for &r in &readings {
            let expected = if r >= prev { r - prev } else { r };
            let d = t.update(r, 0);
            assert_eq!(d.lumps, u32::from(expected));
            total += u64::from(expected);
            assert_eq!(t.totals().0, total);
            prev = r;
        }
    }

    #[test]
    fn stable_cycles_reset_on_any_movement() {
        let mut t = CounterTracker::new();
        t.update(1, 1);
        t.update(1, 1);
        t.update(1, 1);
        assert_eq!(t.stable_cycles(), 2);
        t.update(1, 2);
        assert_eq!(t.stable_cycles(), 0);
    }

    #[test]
    fn high_water_and_stability_trigger_resets() {
        let mut t = CounterTracker::new();
        t.update(9_001, 0);
        assert_eq!(t.reset_due(9_001, 0, 9_000, 128), Some(ResetReason::HighWater));

        let mut t = CounterTracker::new();
        t.update(7, 0);
        for _ in 0..3 {
            t.update(7, 0);
        }
        assert_eq!(t.reset_due(7, 0, 9_000, 3), Some(ResetReason::Stable));
        assert_eq!(t.reset_due(0, 0, 9_000, 3), None);
    }

    #[test]
    fn failed_reset_adopts_last_values() {
        let mut t = CounterTracker::new();
        t.update(50, 20);
        t.rebaseline(ResetOutcome::Failed { lumps: 4, necks: 1 });
        assert_eq!(t.previous(), (4, 1));

        let d = t.update(6, 1);
        assert_eq!(d, CounterDeltas { lumps: 2, necks: 0 });
    }

    #[test]
    fn cleared_reset_zeroes_trackers() {
        let mut t = CounterTracker::new();
        t.update(50, 20);
        t.rebaseline(ResetOutcome::Cleared { attempts: 1 });
        assert_eq!(t.previous(), (0, 0));
        assert_eq!(t.totals(), (50, 20));
    }
}
