//! Acquisition sample types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Recipe;

/// Number of laser scanner diameter channels.
pub const DIAMETER_CHANNELS: usize = 4;

/// One acquisition cycle's result.
///
/// Created by the acquisition loop, enriched by the router (distance,
/// production labels, limits) and consumed by the analysis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Wall-clock time the register block was read
    pub timestamp: DateTime<Utc>,
    /// D1..D4 (mm)
    pub diameters: [f64; DIAMETER_CHANNELS],
    /// Raw hardware lump counter
    pub raw_lumps: u16,
    /// Raw hardware neck counter
    pub raw_necks: u16,
    /// Lumps counted this cycle
    pub lumps_delta: u32,
    /// Necks counted this cycle
    pub necks_delta: u32,
    /// Line speed echoed by the PLC (m/min)
    pub speed: f64,
    /// Status byte
    pub status: u8,
    /// Status/alarm bit word
    pub status_word: u16,
    /// Lump threshold echo (mm)
    pub lump_threshold_echo: f32,
    /// Neck threshold echo (mm)
    pub neck_threshold_echo: f32,

    // === Assigned by the router ===
    /// Distance coordinate (m), monotonically non-decreasing
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub batch: String,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub limits: SampleLimits,
}

impl Sample {
    /// A sample with the given diameters and deltas, everything else zeroed.
    pub fn new(timestamp: DateTime<Utc>, diameters: [f64; DIAMETER_CHANNELS]) -> Self {
        Self {
            timestamp,
            diameters,
            raw_lumps: 0,
            raw_necks: 0,
            lumps_delta: 0,
            necks_delta: 0,
            speed: 0.0,
            status: 0,
            status_word: 0,
            lump_threshold_echo: 0.0,
            neck_threshold_echo: 0.0,
            distance: 0.0,
            batch: String::new(),
            product: String::new(),
            limits: SampleLimits::default(),
        }
    }

    /// Mean of the four channels, or 0 if any channel reads exactly 0
    /// (the scanner's "no measurement" sentinel).
    pub fn average_diameter(&self) -> f64 {
        if self.diameters.iter().any(|&d| d == 0.0) {
            return 0.0;
        }
        self.diameters.iter().sum::<f64>() / DIAMETER_CHANNELS as f64
    }

    /// True when every channel carries a measurement.
    pub fn has_valid_diameters(&self) -> bool {
        self.average_diameter() > 0.0
    }

    /// `(dMax - dMin) / dAvg * 100`, `None` when the diameters are invalid.
    pub fn ovality_percent(&self) -> Option<f64> {
        let avg = self.average_diameter();
        if avg <= 0.0 {
            return None;
        }
        let max = self.diameters.iter().copied().fold(f64::MIN, f64::max);
        let min = self.diameters.iter().copied().fold(f64::MAX, f64::min);
        Some((max - min) / avg * 100.0)
    }
}

/// Limits attached to a sample at routing time so downstream consumers see
/// the values that were active when the sample was routed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleLimits {
    /// Settings id of the recipe the limits came from
    pub settings_id: Option<u64>,
    pub max_lumps: u32,
    pub max_necks: u32,
    pub preset_diameter: f64,
    pub upper_tolerance: f64,
    pub lower_tolerance: f64,
    pub pulsation_threshold: f64,
    pub max_ovality: f64,
    pub max_std_dev: f64,
}

impl From<&Recipe> for SampleLimits {
    fn from(recipe: &Recipe) -> Self {
        Self {
            settings_id: recipe.settings_id,
            max_lumps: recipe.max_lumps,
            max_necks: recipe.max_necks,
            preset_diameter: recipe.preset_diameter,
            upper_tolerance: recipe.upper_tolerance,
            lower_tolerance: recipe.lower_tolerance,
            pulsation_threshold: recipe.pulsation_threshold,
            max_ovality: recipe.max_ovality,
            max_std_dev: recipe.max_std_dev,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_zero_when_any_channel_is_zero() {
        let s = Sample::new(Utc::now(), [18.0, 0.0, 18.0, 18.0]);
        assert_eq!(s.average_diameter(), 0.0);
        assert!(s.ovality_percent().is_none());
    }

    #[test]
    fn ovality_uses_spread_over_mean() {
        let s = Sample::new(Utc::now(), [19.0, 17.0, 18.0, 18.0]);
        assert!((s.average_diameter() - 18.0).abs() < 1e-12);
        let ovality = s.ovality_percent().unwrap();
        assert!((ovality - 2.0 / 18.0 * 100.0).abs() < 1e-9);
    }
}
