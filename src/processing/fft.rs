//! FFT computation using rustfft
//!
//! Magnitude spectrum of the average-diameter series and peak picking for
//! the pulsation alarm.
//!
//! # Features
//!
//! - Pre-planned FFT per window length
//! - DC removal and 2/N one-sided scaling, so magnitudes read in mm
//! - Local-maximum peak detection with minimum prominence and separation
//!
//! # Example
//!
//! ```ignore
//! let mut analyzer = FrequencyAnalyzer::new(64, 31.25, 0.005, 2);
//! if let Some(report) = analyzer.analyze(&diameters, &timestamps, 0.05) {
//!     println!("{} peaks", report.peaks.len());
//! }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::{FrequencySpectrum, ProcessingError, PulsationReport, SpectralPeak};

// ============================================================================
// FFT Processor (Pre-planned for repeated use)
// ============================================================================

/// FFT processor with a pre-planned transform of fixed length.
pub struct FftProcessor {
    fft: Arc<dyn Fft<f64>>,
    size: usize,
    sampling_rate: f64,
}

impl FftProcessor {
    /// Create a new FFT processor
    ///
    /// # Arguments
    /// * `size` - Exact transform length (no zero padding)
    /// * `sampling_rate` - Sampling rate in Hz
    pub fn new(size: usize, sampling_rate: f64) -> Result<Self, ProcessingError> {
        if !sampling_rate.is_finite() || sampling_rate <= 0.0 {
            return Err(ProcessingError::InvalidSamplingRate(sampling_rate));
        }
        if size < 2 {
            return Err(ProcessingError::InsufficientData {
                needed: 2,
                available: size,
            });
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);

        Ok(Self {
            fft,
            size,
            sampling_rate,
        })
    }

    /// Compute the one-sided magnitude spectrum of the last `size` samples
    /// after subtracting their mean.
    pub fn compute(&self, signal: &[f64]) -> Result<FrequencySpectrum, ProcessingError> {
        if signal.len() < self.size {
            return Err(ProcessingError::InsufficientData {
                needed: self.size,
                available: signal.len(),
            });
        }

        let window = &signal[signal.len() - self.size..];
        let mean = window.iter().sum::<f64>() / self.size as f64;

        let mut buffer: Vec<Complex<f64>> = window
            .iter()
            .map(|&x| Complex::new(x - mean, 0.0))
            .collect();
        self.fft.process(&mut buffer);

        let n_positive = self.size / 2 + 1;
        let frequencies = self.frequency_bins();

        // 2/N for one-sided spectrum (except DC and, for even N, Nyquist)
        let nyquist = if self.size % 2 == 0 {
            Some(n_positive - 1)
        } else {
            None
        };
        let magnitudes: Vec<f64> = buffer
            .iter()
            .take(n_positive)
            .enumerate()
            .map(|(i, c)| {
                let scale = if i == 0 || Some(i) == nyquist {
                    1.0 / self.size as f64
                } else {
                    2.0 / self.size as f64
                };
                c.norm() * scale
            })
            .collect();

        Ok(FrequencySpectrum {
            frequencies,
            magnitudes,
            sample_rate: self.sampling_rate,
        })
    }

    /// Point the frequency axis at a new sample rate. The plan depends only
    /// on the length and is kept.
    pub fn set_sampling_rate(&mut self, sampling_rate: f64) -> Result<(), ProcessingError> {
        if !sampling_rate.is_finite() || sampling_rate <= 0.0 {
            return Err(ProcessingError::InvalidSamplingRate(sampling_rate));
        }
        self.sampling_rate = sampling_rate;
        Ok(())
    }

    /// Get frequency bins for this FFT configuration
    pub fn frequency_bins(&self) -> Vec<f64> {
        let resolution = self.frequency_resolution();
        (0..=self.size / 2).map(|i| i as f64 * resolution).collect()
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    pub const fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    /// Get the frequency resolution (Hz per bin)
    pub fn frequency_resolution(&self) -> f64 {
        self.sampling_rate / self.size as f64
    }
}

// ============================================================================
// Peak Detection
// ============================================================================

/// Indices of local maxima that are at least `min_distance` bins apart and
/// stand out by at least `min_prominence` from their surroundings.
///
/// Separation is enforced first, keeping the taller of two close peaks.
/// Prominence is the height above the higher of the two lowest points
/// between the peak and the nearest taller sample on each side (or the
/// spectrum edge). The DC bin is never a peak. Result is in bin order.
pub fn find_peaks(magnitudes: &[f64], min_prominence: f64, min_distance: usize) -> Vec<usize> {
    let n = magnitudes.len();
    if n < 3 {
        return Vec::new();
    }

    let mut candidates: Vec<usize> = (1..n - 1)
        .filter(|&i| magnitudes[i] > magnitudes[i - 1] && magnitudes[i] >= magnitudes[i + 1])
        .collect();

    // Greedy separation, tallest first
    if min_distance > 1 {
        let mut by_height = candidates.clone();
        by_height.sort_by(|&a, &b| magnitudes[b].total_cmp(&magnitudes[a]));
        let mut kept: Vec<usize> = Vec::with_capacity(by_height.len());
        for idx in by_height {
            if kept.iter().all(|&k| k.abs_diff(idx) >= min_distance) {
                kept.push(idx);
            }
        }
        kept.sort_unstable();
        candidates = kept;
    }

    candidates
        .into_iter()
        .filter(|&i| prominence(magnitudes, i) >= min_prominence)
        .collect()
}

fn prominence(magnitudes: &[f64], peak: usize) -> f64 {
    let height = magnitudes[peak];

    let mut left_min = height;
    for &m in magnitudes[..peak].iter().rev() {
        if m > height {
            break;
        }
        left_min = left_min.min(m);
    }

    let mut right_min = height;
    for &m in &magnitudes[peak + 1..] {
        if m > height {
            break;
        }
        right_min = right_min.min(m);
    }

    height - left_min.max(right_min)
}

// ============================================================================
// Frequency Analyzer
// ============================================================================

/// Pulsation detector over the trailing diameter series.
///
/// Keeps one planned transform per window length. The estimated sample rate
/// only rescales the frequency axis.
pub struct FrequencyAnalyzer {
    window: usize,
    default_sample_rate: f64,
    min_prominence: f64,
    min_distance: usize,
    processor: Option<FftProcessor>,
}

impl FrequencyAnalyzer {
    pub const fn new(
        window: usize,
        default_sample_rate: f64,
        min_prominence: f64,
        min_distance: usize,
    ) -> Self {
        Self {
            window,
            default_sample_rate,
            min_prominence,
            min_distance,
            processor: None,
        }
    }

    /// Samples required before [`analyze`](Self::analyze) produces a report.
    pub const fn window(&self) -> usize {
        self.window
    }

    /// Sample rate from the mean spacing of `timestamps`, or the default
    /// when the spacing is zero or there are fewer than two timestamps.
    pub fn estimate_sample_rate(&self, timestamps: &[DateTime<Utc>]) -> f64 {
        let (Some(first), Some(last)) = (timestamps.first(), timestamps.last()) else {
            return self.default_sample_rate;
        };
        if timestamps.len() < 2 {
            return self.default_sample_rate;
        }
        let span = (*last - *first).num_microseconds().unwrap_or(0) as f64 / 1e6;
        let period = span / (timestamps.len() - 1) as f64;
        if period > 0.0 && period.is_finite() {
            1.0 / period
        } else {
            self.default_sample_rate
        }
    }

    /// Analyse the most recent `window` samples.
    ///
    /// `timestamps` must be index-aligned with `diameters`. Returns `None`
    /// when there is not enough data yet.
    pub fn analyze(
        &mut self,
        diameters: &[f64],
        timestamps: &[DateTime<Utc>],
        pulsation_threshold: f64,
    ) -> Option<PulsationReport> {
        if diameters.len() < self.window || timestamps.len() < self.window {
            return None;
        }

        let recent_ts = &timestamps[timestamps.len() - self.window..];
        let sample_rate = self.estimate_sample_rate(recent_ts);

        match self.processor.as_mut() {
            Some(p) if p.size() == self.window => {
                if let Err(e) = p.set_sampling_rate(sample_rate) {
                    tracing::debug!(error = %e, "Spectrum skipped");
                    return None;
                }
            }
            _ => match FftProcessor::new(self.window, sample_rate) {
                Ok(p) => self.processor = Some(p),
                Err(e) => {
                    tracing::debug!(error = %e, "Spectrum skipped");
                    return None;
                }
            },
        }
        let spectrum = self.processor.as_ref()?.compute(diameters).ok()?;

        let peaks = find_peaks(&spectrum.magnitudes, self.min_prominence, self.min_distance)
            .into_iter()
            .filter(|&i| spectrum.magnitudes[i] > pulsation_threshold)
            .map(|i| SpectralPeak {
                frequency: spectrum.frequencies[i],
                magnitude: spectrum.magnitudes[i],
            })
            .collect();

        Some(PulsationReport {
            peaks,
            spectrum,
            samples: self.window,
            timestamp: Utc::now(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
