//! Signal processing: diameter spectrum for pulsation, channel statistics

mod fft;
mod stats;

pub use fft::*;
pub use stats::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors in signal processing
#[derive(Error, Debug, PartialEq)]
pub enum ProcessingError {
    #[error("Insufficient data: need {needed}, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("Invalid sampling rate: {0}")]
    InvalidSamplingRate(f64),
}

/// One-sided magnitude spectrum of a real signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencySpectrum {
    /// Frequency bins (Hz)
    pub frequencies: Vec<f64>,
    /// Magnitude at each frequency (signal units, 2/N scaled)
    pub magnitudes: Vec<f64>,
    /// Sample rate used
    pub sample_rate: f64,
}

/// A detected spectral peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralPeak {
    /// Hz
    pub frequency: f64,
    /// mm
    pub magnitude: f64,
}

/// Output of one pulsation analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulsationReport {
    /// Peaks above the pulsation threshold; non-empty means pulsation
    pub peaks: Vec<SpectralPeak>,
    pub spectrum: FrequencySpectrum,
    /// Samples analysed
    pub samples: usize,
    pub timestamp: DateTime<Utc>,
}

impl PulsationReport {
    pub fn has_pulsation(&self) -> bool {
        !self.peaks.is_empty()
    }
}
