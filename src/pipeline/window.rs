//! Time → distance conversion and bounded display histories
//!
//! The scanner reports per time step; everything downstream (flaw window,
//! plots, events) is indexed by metres of extrudate. Distance is integrated
//! from the configured line speed and the wall-clock gap between samples.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::types::Sample;

/// Trailing histories, index-aligned pairwise:
/// `x` with `lumps`/`necks`, `diameter_x` with `avg_diameter`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowHistories {
    pub x: Vec<f64>,
    pub lumps: Vec<u32>,
    pub necks: Vec<u32>,
    pub diameter_x: Vec<f64>,
    pub avg_diameter: Vec<f64>,
}

/// Distance integrator with bounded FIFO histories.
pub struct WindowProcessor<R: Rng = StdRng> {
    rng: R,
    max_samples: usize,
    current_x: f64,
    last_timestamp: Option<DateTime<Utc>>,
    x: VecDeque<f64>,
    lumps: VecDeque<u32>,
    necks: VecDeque<u32>,
    diameter_x: VecDeque<f64>,
    avg_diameter: VecDeque<f64>,
}

impl WindowProcessor<StdRng> {
    pub fn new(max_samples: usize) -> Self {
        Self::with_rng(max_samples, StdRng::from_entropy())
    }
}

impl<R: Rng> WindowProcessor<R> {
    /// Use a caller-supplied RNG for the speed jitter (seeded in tests).
    pub fn with_rng(max_samples: usize, rng: R) -> Self {
        let cap = max_samples.max(1);
        Self {
            rng,
            max_samples: cap,
            current_x: 0.0,
            last_timestamp: None,
            x: VecDeque::with_capacity(cap),
            lumps: VecDeque::with_capacity(cap),
            necks: VecDeque::with_capacity(cap),
            diameter_x: VecDeque::with_capacity(cap),
            avg_diameter: VecDeque::with_capacity(cap),
        }
    }

    /// Advance the distance coordinate by one sample and record it.
    ///
    /// `production_speed` is in m/min; `speed_fluctuation_percent` > 0 jitters
    /// it uniformly by up to ± that percentage. The first sample and samples
    /// whose clock went backwards add no distance.
    pub fn process(
        &mut self,
        sample: &Sample,
        production_speed: f64,
        speed_fluctuation_percent: f64,
    ) -> f64 {
        let dt = self.last_timestamp.map_or(0.0, |prev| {
            let micros = (sample.timestamp - prev).num_microseconds().unwrap_or(0);
            (micros as f64 / 1e6).max(0.0)
        });
        self.last_timestamp = Some(match self.last_timestamp {
            Some(prev) if prev > sample.timestamp => prev,
            _ => sample.timestamp,
        });

        let mut speed = production_speed;
        if speed_fluctuation_percent > 0.0 {
            let jitter = self
                .rng
                .gen_range(-speed_fluctuation_percent..=speed_fluctuation_percent);
            speed *= 1.0 + jitter / 100.0;
        }
        let speed_mps = (speed / 60.0).max(0.0);
        if speed_mps.is_finite() {
            self.current_x += dt * speed_mps;
        }

        push_bounded(&mut self.x, self.current_x, self.max_samples);
        push_bounded(&mut self.lumps, sample.lumps_delta, self.max_samples);
        push_bounded(&mut self.necks, sample.necks_delta, self.max_samples);

        let avg = sample.average_diameter();
        if avg > 0.0 {
            push_bounded(&mut self.diameter_x, self.current_x, self.max_samples);
            push_bounded(&mut self.avg_diameter, avg, self.max_samples);
        }

        self.current_x
    }

    pub const fn current_x(&self) -> f64 {
        self.current_x
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn histories(&self) -> WindowHistories {
        WindowHistories {
            x: self.x.iter().copied().collect(),
            lumps: self.lumps.iter().copied().collect(),
            necks: self.necks.iter().copied().collect(),
            diameter_x: self.diameter_x.iter().copied().collect(),
            avg_diameter: self.avg_diameter.iter().copied().collect(),
        }
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, value: T, cap: usize) {
    while buf.len() >= cap {
        buf.pop_front();
    }
    buf.push_back(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_at(start: DateTime<Utc>, ms: i64, d: f64) -> Sample {
        Sample::new(start + Duration::milliseconds(ms), [d; 4])
    }

    fn seeded(cap: usize) -> WindowProcessor<StdRng> {
        WindowProcessor::with_rng(cap, StdRng::seed_from_u64(7))
    }

    #[test]
    fn distance_integrates_speed_over_time() {
        let mut wp = seeded(100);
        let t0 = Utc::now();
        assert_eq!(wp.process(&sample_at(t0, 0, 18.0), 60.0, 0.0), 0.0);
        // 60 m/min = 1 m/s, 500 ms later
        let x = wp.process(&sample_at(t0, 500, 18.0), 60.0, 0.0);
        assert!((x - 0.5).abs() < 1e-9);
    }

    #[test]
    fn clock_going_backwards_adds_nothing() {
        let mut wp = seeded(100);
        let t0 = Utc::now();
        wp.process(&sample_at(t0, 1_000, 18.0), 60.0, 0.0);
        let x = wp.process(&sample_at(t0, 0, 18.0), 60.0, 0.0);
        assert_eq!(x, 0.0);
        let x = wp.process(&sample_at(t0, 1_250, 18.0), 60.0, 0.0);
        assert!((x - 0.25).abs() < 1e-9);
    }

    #[test]
    fn jitter_stays_within_band() {
        let mut wp = seeded(10);
        let t0 = Utc::now();
        wp.process(&sample_at(t0, 0, 18.0), 60.0, 10.0);
        let mut prev = 0.0;
        for i in 1..=50 {
            let x = wp.process(&sample_at(t0, i * 1_000, 18.0), 60.0, 10.0);
            let step = x - prev;
            assert!((0.9 - 1e-9..=1.1 + 1e-9).contains(&step), "step {step}");
            prev = x;
        }
    }

    #[test]
    fn histories_are_capped_and_aligned() {
        let mut wp = seeded(5);
        let t0 = Utc::now();
        for i in 0..20 {
            let d = if i % 3 == 0 { 0.0 } else { 18.0 };
            wp.process(&sample_at(t0, i * 32, d), 30.0, 0.0);

            let h = wp.histories();
            assert!(h.x.len() <= 5);
            assert_eq!(h.x.len(), h.lumps.len());
            assert_eq!(h.x.len(), h.necks.len());
            assert!(h.diameter_x.len() <= 5);
            assert_eq!(h.diameter_x.len(), h.avg_diameter.len());
        }
    }

    #[test]
    fn invalid_diameters_are_not_charted() {
        let mut wp = seeded(10);
        let t0 = Utc::now();
        let mut s = sample_at(t0, 0, 18.0);
        s.diameters[2] = 0.0;
        wp.process(&s, 30.0, 0.0);

        let h = wp.histories();
        assert_eq!(h.x.len(), 1);
        assert!(h.avg_diameter.is_empty());
    }
}
