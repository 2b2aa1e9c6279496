//! Trailing-distance lump/neck counts
//!
//! Each defect delta is stored with the distance it was seen at. Entries that
//! fall behind `current_distance - window_size` are evicted before any count
//! is read, so `window_*_count` is always the exact sum over the window.

use std::collections::VecDeque;

/// One signal's entries in distance order with its running sums.
#[derive(Debug, Clone, Default)]
struct FlawSeries {
    entries: VecDeque<(f64, u32)>,
    window_total: u64,
    lifetime_total: u64,
}

impl FlawSeries {
    fn add(&mut self, distance: f64, count: u32) {
        if count == 0 {
            return;
        }
        self.entries.push_back((distance, count));
        self.window_total += u64::from(count);
        self.lifetime_total += u64::from(count);
    }

    fn evict_before(&mut self, cutoff: f64) {
        let inside = self.entries.partition_point(|&(d, _)| d < cutoff);
        if inside == 0 {
            return;
        }
        let removed: u64 = self.entries.drain(..inside).map(|(_, c)| u64::from(c)).sum();
        self.window_total -= removed;
    }

    fn clear_window(&mut self) {
        self.entries.clear();
        self.window_total = 0;
    }
}

/// Windowed defect counter over the distance coordinate.
#[derive(Debug, Clone)]
pub struct FlawWindowTracker {
    window_size: f64,
    current_distance: f64,
    lumps: FlawSeries,
    necks: FlawSeries,
}

impl FlawWindowTracker {
    /// `window_size` in metres
    pub fn new(window_size: f64) -> Self {
        Self {
            window_size: window_size.max(0.0),
            current_distance: 0.0,
            lumps: FlawSeries::default(),
            necks: FlawSeries::default(),
        }
    }

    /// Record the defect deltas seen at `distance` and evict what fell out.
    ///
    /// Distances are expected non-decreasing; an earlier one is clamped to the
    /// current distance so the entries stay sorted.
    pub fn record(&mut self, distance: f64, lumps_delta: u32, necks_delta: u32) {
        let at = distance.max(self.current_distance);
        self.current_distance = at;
        self.lumps.add(at, lumps_delta);
        self.necks.add(at, necks_delta);
        self.evict();
    }

    /// Move the window forward without recording anything.
    pub fn advance(&mut self, distance: f64) {
        self.current_distance = distance.max(self.current_distance);
        self.evict();
    }

    /// Change the window length. Entries are kept; only those now outside
    /// the shorter window are evicted.
    pub fn set_window_size(&mut self, window_size: f64) {
        self.window_size = window_size.max(0.0);
        self.evict();
    }

    /// Forget the window contents (new batch). Lifetime totals are kept.
    pub fn reset(&mut self) {
        self.lumps.clear_window();
        self.necks.clear_window();
    }

    fn evict(&mut self) {
        let cutoff = self.current_distance - self.window_size;
        self.lumps.evict_before(cutoff);
        self.necks.evict_before(cutoff);
    }

    pub const fn window_size(&self) -> f64 {
        self.window_size
    }

    pub const fn current_distance(&self) -> f64 {
        self.current_distance
    }

    pub const fn window_lumps_count(&self) -> u64 {
        self.lumps.window_total
    }

    pub const fn window_necks_count(&self) -> u64 {
        self.necks.window_total
    }

    pub const fn total_lumps_count(&self) -> u64 {
        self.lumps.lifetime_total
    }

    pub const fn total_necks_count(&self) -> u64 {
        self.necks.lifetime_total
    }

    /// Entries currently held (lumps, necks)
    pub fn entry_counts(&self) -> (usize, usize) {
        (self.lumps.entries.len(), self.necks.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn window_drops_entries_behind_cutoff() {
        let mut t = FlawWindowTracker::new(0.5);
        t.record(1.0, 1, 0);
        t.record(1.2, 1, 0);
        t.record(1.6, 2, 0);
        t.advance(1.8);

        assert_eq!(t.window_lumps_count(), 2);
        assert_eq!(t.total_lumps_count(), 4);
        assert_eq!(t.entry_counts(), (1, 0));
    }

    #[test]
    fn entry_on_the_cutoff_is_kept() {
        let mut t = FlawWindowTracker::new(1.0);
        t.record(2.0, 0, 3);
        t.advance(3.0);
        assert_eq!(t.window_necks_count(), 3);
        t.advance(3.0001);
        assert_eq!(t.window_necks_count(), 0);
    }

    #[test]
    fn window_count_matches_brute_force_sum() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut t = FlawWindowTracker::new(0.75);
        let mut log: Vec<(f64, u32)> = Vec::new();
        let mut x = 0.0;

        for _ in 0..2_000 {
            x += rng.gen_range(0.0..0.05);
            let delta = if rng.gen_bool(0.3) { rng.gen_range(1..4) } else { 0 };
            t.record(x, delta, 0);
            if delta > 0 {
                log.push((x, delta));
            }

            let expected: u64 = log
                .iter()
                .filter(|&&(d, _)| d >= x - 0.75)
                .map(|&(_, c)| u64::from(c))
                .sum();
            assert_eq!(t.window_lumps_count(), expected);
        }
    }

    #[test]
    fn resize_keeps_entries_inside_new_window() {
        let mut t = FlawWindowTracker::new(2.0);
        t.record(1.0, 1, 1);
        t.record(2.5, 1, 1);
        t.set_window_size(1.0);
        assert_eq!(t.window_lumps_count(), 1);

        t.set_window_size(5.0);
        assert_eq!(t.window_lumps_count(), 1, "evicted entries do not come back");
    }

    #[test]
    fn reset_clears_window_but_not_lifetime() {
        let mut t = FlawWindowTracker::new(10.0);
        t.record(1.0, 2, 5);
        t.reset();
        assert_eq!(t.window_lumps_count(), 0);
        assert_eq!(t.window_necks_count(), 0);
        assert_eq!(t.total_necks_count(), 5);
    }

    #[test]
    fn earlier_distance_is_clamped() {
        let mut t = FlawWindowTracker::new(1.0);
        t.record(5.0, 1, 0);
        t.record(4.0, 1, 0);
        assert_eq!(t.current_distance(), 5.0);
        assert_eq!(t.window_lumps_count(), 2);
    }
}
