//! Trailing per-channel diameter statistics

use std::collections::VecDeque;

use statrs::statistics::Statistics;

use crate::types::DIAMETER_CHANNELS;

/// Fixed-length trailing buffers for D1..D4.
#[derive(Debug, Clone)]
pub struct ChannelStats {
    window: usize,
    channels: [VecDeque<f64>; DIAMETER_CHANNELS],
}

impl ChannelStats {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            channels: std::array::from_fn(|_| VecDeque::with_capacity(window)),
        }
    }

    /// Append one reading per channel. Readings with any zero channel are
    /// ignored so a blinded scanner does not pollute the deviation.
    pub fn push(&mut self, diameters: &[f64; DIAMETER_CHANNELS]) {
        if diameters.iter().any(|&d| d == 0.0 || !d.is_finite()) {
            return;
        }
        for (buf, &d) in self.channels.iter_mut().zip(diameters) {
            if buf.len() == self.window {
                buf.pop_front();
            }
            buf.push_back(d);
        }
    }

    /// Change the window length, dropping the oldest readings if it shrinks.
    pub fn resize(&mut self, window: usize) {
        self.window = window.max(2);
        for buf in &mut self.channels {
            while buf.len() > self.window {
                buf.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Population standard deviation of each channel, once the window is full.
    pub fn std_devs(&self) -> Option<[f64; DIAMETER_CHANNELS]> {
        if self.len() < self.window {
            return None;
        }
        Some(std::array::from_fn(|i| {
            self.channels[i].iter().population_std_dev()
        }))
    }

    pub fn clear(&mut self) {
        for buf in &mut self.channels {
            buf.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std_dev_needs_full_window() {
        let mut stats = ChannelStats::new(4);
        for _ in 0..3 {
            stats.push(&[18.0; 4]);
        }
        assert!(stats.std_devs().is_none());
        stats.push(&[18.0; 4]);
        assert_eq!(stats.std_devs(), Some([0.0; 4]));
    }

    #[test]
    fn population_std_dev_per_channel() {
        let mut stats = ChannelStats::new(2);
        stats.push(&[17.0, 18.0, 18.0, 18.0]);
        stats.push(&[19.0, 18.0, 18.0, 18.0]);
        let sd = stats.std_devs().unwrap();
        assert!((sd[0] - 1.0).abs() < 1e-12);
        assert_eq!(sd[1], 0.0);
    }

    #[test]
    fn zero_channel_readings_are_skipped() {
        let mut stats = ChannelStats::new(2);
        stats.push(&[18.0, 0.0, 18.0, 18.0]);
        assert!(stats.is_empty());
    }

    #[test]
    fn window_is_bounded() {
        let mut stats = ChannelStats::new(3);
        for i in 0..10 {
            stats.push(&[18.0 + f64::from(i); 4]);
        }
        assert_eq!(stats.len(), 3);
        stats.resize(2);
        assert_eq!(stats.len(), 2);
    }
}
