//! Sample router: the single consumer of the acquisition channel
//!
//! Per wake-up:
//! 1. Shed the oldest backlog when the queue is past the critical depth
//! 2. Take up to `batch_size` samples
//! 3. Stamp context and limits, convert to distance, update the flaw window
//! 4. Forward to analysis with `try_send` (drop on full, counted)
//! 5. Publish a display snapshot

use rand::rngs::StdRng;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::flaw::FlawWindowTracker;
use super::state::{ContextHandle, RouterSnapshot, RouterStats};
use super::window::WindowProcessor;
use crate::config::{ConfigHandle, LineConfig};
use crate::types::{Sample, SampleLimits};

/// A routed sample and the flaw counts at its distance.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedSample {
    pub sample: Sample,
    pub window_lumps: u64,
    pub window_necks: u64,
    pub total_lumps: u64,
    pub total_necks: u64,
}

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub shed: usize,
    pub routed: usize,
}

/// Owns the window processor and flaw tracker for the routing context.
pub struct SampleRouter<R: Rng = StdRng> {
    rx: mpsc::Receiver<Sample>,
    analysis: mpsc::Sender<RoutedSample>,
    config: ConfigHandle,
    context: ContextHandle,
    window: WindowProcessor<R>,
    flaws: FlawWindowTracker,
    snapshot_tx: watch::Sender<RouterSnapshot>,
    stats: RouterStats,
    batch_label: String,
}

impl SampleRouter<StdRng> {
    pub fn new(
        rx: mpsc::Receiver<Sample>,
        analysis: mpsc::Sender<RoutedSample>,
        config: ConfigHandle,
        context: ContextHandle,
        snapshot_tx: watch::Sender<RouterSnapshot>,
    ) -> Self {
        let max_samples = config.snapshot().router.history_max_samples;
        Self::with_window(
            rx,
            analysis,
            config,
            context,
            snapshot_tx,
            WindowProcessor::new(max_samples),
        )
    }
}

impl<R: Rng> SampleRouter<R> {
    /// Build with a caller-supplied window processor (seeded jitter in tests).
    pub fn with_window(
        rx: mpsc::Receiver<Sample>,
        analysis: mpsc::Sender<RoutedSample>,
        config: ConfigHandle,
        context: ContextHandle,
        snapshot_tx: watch::Sender<RouterSnapshot>,
        window: WindowProcessor<R>,
    ) -> Self {
        let cfg = config.snapshot();
        let batch_label = context.snapshot().batch.clone();
        Self {
            rx,
            analysis,
            flaws: FlawWindowTracker::new(cfg.recipe.flaw_window_m),
            config,
            context,
            window,
            snapshot_tx,
            stats: RouterStats::default(),
            batch_label,
        }
    }

    pub const fn stats(&self) -> RouterStats {
        self.stats
    }

    /// Route until cancelled or the acquisition side hangs up.
    pub async fn run(mut self, cancel: CancellationToken) -> RouterStats {
        info!("Sample router started");
        loop {
            let first = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Sample router shutting down");
                    break;
                }
                next = self.rx.recv() => match next {
                    Some(sample) => sample,
                    None => {
                        info!("Acquisition channel closed, router exiting");
                        break;
                    }
                },
            };
            self.drain(Some(first));
        }
        info!(
            routed = self.stats.routed,
            shed = self.stats.shed,
            analysis_dropped = self.stats.analysis_dropped,
            "Sample router stopped"
        );
        self.stats
    }

    /// One drain cycle over whatever is queued right now.
    pub fn drain_pending(&mut self) -> DrainReport {
        self.drain(None)
    }

    /// `first` is a sample already taken off the channel; it is the oldest.
    fn drain(&mut self, first: Option<Sample>) -> DrainReport {
        let cfg = self.config.snapshot();
        let mut report = DrainReport::default();

        let mut head = first;
        let depth = self.rx.len() + usize::from(head.is_some());
        if depth > cfg.router.critical_depth {
            let mut excess = depth.saturating_sub(cfg.router.warning_depth);
            if excess > 0 && head.take().is_some() {
                excess -= 1;
                report.shed += 1;
            }
            while excess > 0 && self.rx.try_recv().is_ok() {
                excess -= 1;
                report.shed += 1;
            }
            self.stats.shed += report.shed as u64;
            warn!(
                depth,
                shed = report.shed,
                remaining = self.rx.len(),
                "Acquisition backlog over critical depth, shedding oldest samples"
            );
        }

        let mut batch: Vec<Sample> = Vec::with_capacity(cfg.router.batch_size);
        batch.extend(head);
        while batch.len() < cfg.router.batch_size {
            match self.rx.try_recv() {
                Ok(sample) => batch.push(sample),
                Err(_) => break,
            }
        }
        if batch.is_empty() {
            return report;
        }

        self.sync_with_config(&cfg);
        let context = self.context.snapshot();
        if context.batch != self.batch_label {
            info!(old = %self.batch_label, new = %context.batch, "Batch changed, flaw window cleared");
            self.flaws.reset();
            self.batch_label = context.batch.clone();
        }
        let limits = SampleLimits::from(&cfg.recipe);

        let mut latest = None;
        for mut sample in batch {
            sample.batch = context.batch.clone();
            sample.product = context.product.clone();
            sample.limits = limits;

            let x = self.window.process(
                &sample,
                cfg.production.speed_m_per_min,
                cfg.production.speed_fluctuation_percent,
            );
            sample.distance = x;
            self.flaws.record(x, sample.lumps_delta, sample.necks_delta);

            let routed = RoutedSample {
                sample,
                window_lumps: self.flaws.window_lumps_count(),
                window_necks: self.flaws.window_necks_count(),
                total_lumps: self.flaws.total_lumps_count(),
                total_necks: self.flaws.total_necks_count(),
            };
            latest = Some(routed.sample.clone());
            self.forward(routed);
            report.routed += 1;
        }

        self.stats.batches += 1;
        self.stats.routed += report.routed as u64;
        self.publish(latest);
        debug!(routed = report.routed, x = self.window.current_x(), "Batch routed");
        report
    }

    fn sync_with_config(&mut self, cfg: &LineConfig) {
        let window = cfg.recipe.flaw_window_m;
        if (window - self.flaws.window_size()).abs() > f64::EPSILON {
            info!(old = self.flaws.window_size(), new = window, "Flaw window resized");
            self.flaws.set_window_size(window);
        }
    }

    fn forward(&mut self, routed: RoutedSample) {
        match self.analysis.try_send(routed) {
            Ok(()) => self.stats.forwarded += 1,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.analysis_dropped += 1;
                if self.stats.analysis_dropped.is_power_of_two() {
                    warn!(dropped = self.stats.analysis_dropped, "Analysis channel full, sample not analysed");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.analysis_dropped += 1;
            }
        }
    }

    fn publish(&self, latest: Option<Sample>) {
        let snapshot = RouterSnapshot {
            current_distance: self.window.current_x(),
            flaw_window_m: self.flaws.window_size(),
            window_lumps: self.flaws.window_lumps_count(),
            window_necks: self.flaws.window_necks_count(),
            total_lumps: self.flaws.total_lumps_count(),
            total_necks: self.flaws.total_necks_count(),
            latest,
            histories: self.window.histories(),
            stats: self.stats,
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}
