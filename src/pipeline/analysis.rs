//! Analysis context: spectrum, channel statistics and alarm evaluation
//!
//! Consumes routed samples one at a time. Owns the frequency analyzer, the
//! per-channel std-dev buffers and the alarm engine; PLC side effects (lamp,
//! scanner thresholds) are requested through the acquisition command channel
//! and never block.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::router::RoutedSample;
use super::state::AnalysisSnapshot;
use crate::acquisition::AcquisitionCommand;
use crate::alarms::{AlarmEngine, AlarmInputs, Evaluation};
use crate::config::{AnalysisConfig, ConfigHandle};
use crate::processing::{ChannelStats, FrequencyAnalyzer, PulsationReport};
use crate::storage::EventSink;

/// The analysis stage. Build with [`new`](Self::new), drive with
/// [`run`](Self::run) or feed it directly with [`process`](Self::process).
pub struct AnalysisStage {
    rx: mpsc::Receiver<RoutedSample>,
    commands: mpsc::Sender<AcquisitionCommand>,
    config: ConfigHandle,
    tuning: AnalysisConfig,
    analyzer: FrequencyAnalyzer,
    channel_stats: ChannelStats,
    diameters: VecDeque<f64>,
    timestamps: VecDeque<DateTime<Utc>>,
    engine: AlarmEngine,
    sink: Arc<dyn EventSink>,
    snapshot_tx: watch::Sender<AnalysisSnapshot>,
    last_report: Option<PulsationReport>,
    thresholds: (f32, f32),
    samples_analysed: u64,
    commands_dropped: u64,
}

impl AnalysisStage {
    pub fn new(
        rx: mpsc::Receiver<RoutedSample>,
        commands: mpsc::Sender<AcquisitionCommand>,
        config: ConfigHandle,
        sink: Arc<dyn EventSink>,
        snapshot_tx: watch::Sender<AnalysisSnapshot>,
    ) -> Self {
        let cfg = config.snapshot();
        let tuning = cfg.analysis.clone();
        Self {
            rx,
            commands,
            analyzer: analyzer_for(&tuning),
            channel_stats: ChannelStats::new(tuning.std_dev_window),
            diameters: VecDeque::with_capacity(tuning.fft_min_samples),
            timestamps: VecDeque::with_capacity(tuning.fft_min_samples),
            engine: AlarmEngine::new(Arc::clone(&sink), tuning.lamp_policy),
            sink,
            snapshot_tx,
            last_report: None,
            // written by the acquisition thread on every counter priming
            thresholds: (cfg.recipe.lump_threshold, cfg.recipe.neck_threshold),
            tuning,
            config,
            samples_analysed: 0,
            commands_dropped: 0,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> u64 {
        info!(sink = self.sink.backend_name(), "Analysis stage started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(routed) => {
                        self.process(&routed);
                    }
                    None => {
                        info!("Router channel closed, analysis exiting");
                        break;
                    }
                },
            }
        }
        let (saved, failed) = self.engine.event_counts();
        info!(
            samples = self.samples_analysed,
            events_saved = saved,
            events_failed = failed,
            "Analysis stage stopped"
        );
        self.samples_analysed
    }

    /// Analyse one routed sample and apply the resulting alarm transitions.
    pub fn process(&mut self, routed: &RoutedSample) -> Evaluation {
        let cfg = self.config.snapshot();
        self.retune(&cfg.analysis);
        self.sync_thresholds(cfg.recipe.lump_threshold, cfg.recipe.neck_threshold);

        let sample = &routed.sample;
        let mut pulsation_peaks = None;
        if sample.has_valid_diameters() {
            self.channel_stats.push(&sample.diameters);
            self.push_diameter(sample.average_diameter(), sample.timestamp);

            let (d, _) = self.diameters.as_slices();
            let (t, _) = self.timestamps.as_slices();
            if let Some(report) =
                self.analyzer
                    .analyze(d, t, sample.limits.pulsation_threshold)
            {
                pulsation_peaks = Some(report.peaks.len());
                self.last_report = Some(report);
            }
        }
        let std_devs = self.channel_stats.std_devs();

        let evaluation = self.engine.evaluate(&AlarmInputs {
            sample,
            window_lumps: routed.window_lumps,
            window_necks: routed.window_necks,
            pulsation_peaks,
            std_devs,
        });
        if let Some(lamp) = evaluation.lamp {
            self.send_command(AcquisitionCommand::SetCommonFault(lamp));
        }

        self.samples_analysed += 1;
        self.publish(std_devs, sample.ovality_percent());
        evaluation
    }

    fn push_diameter(&mut self, avg: f64, timestamp: DateTime<Utc>) {
        let cap = self.tuning.fft_min_samples.max(1);
        while self.diameters.len() >= cap {
            self.diameters.pop_front();
            self.timestamps.pop_front();
        }
        self.diameters.push_back(avg);
        self.timestamps.push_back(timestamp);
        self.diameters.make_contiguous();
        self.timestamps.make_contiguous();
    }

    /// Pick up hot-reloaded analysis tuning.
    fn retune(&mut self, tuning: &AnalysisConfig) {
        if *tuning == self.tuning {
            return;
        }
        info!(
            fft_min_samples = tuning.fft_min_samples,
            std_dev_window = tuning.std_dev_window,
            lamp_policy = ?tuning.lamp_policy,
            "Analysis tuning changed"
        );
        if tuning.std_dev_window != self.tuning.std_dev_window {
            self.channel_stats.resize(tuning.std_dev_window);
        }
        self.analyzer = analyzer_for(tuning);
        self.engine.set_lamp_policy(tuning.lamp_policy);
        self.tuning = tuning.clone();
    }

    /// Ask the acquisition thread to rewrite the scanner thresholds when the
    /// recipe changed them.
    fn sync_thresholds(&mut self, lump: f32, neck: f32) {
        if (lump, neck) == self.thresholds {
            return;
        }
        info!(lump, neck, "Recipe thresholds changed, writing to PLC");
        if self.send_command(AcquisitionCommand::WriteThresholds { lump, neck }) {
            self.thresholds = (lump, neck);
        }
    }

    fn send_command(&mut self, command: AcquisitionCommand) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => {
                debug!(?command, "PLC command queued");
                true
            }
            Err(e) => {
                self.commands_dropped += 1;
                warn!(?command, error = %e, "PLC command dropped");
                false
            }
        }
    }

    fn publish(&self, std_devs: Option<[f64; 4]>, ovality_percent: Option<f64>) {
        let (events_saved, events_failed) = self.engine.event_counts();
        self.snapshot_tx.send_replace(AnalysisSnapshot {
            alarms: self.engine.states(),
            pulsation: self.last_report.clone(),
            std_devs,
            ovality_percent,
            samples_analysed: self.samples_analysed,
            events_saved,
            events_failed,
            commands_dropped: self.commands_dropped,
            sink_available: self.sink.is_available(),
        });
    }
}

fn analyzer_for(tuning: &AnalysisConfig) -> FrequencyAnalyzer {
    FrequencyAnalyzer::new(
        tuning.fft_min_samples,
        tuning.default_sample_rate_hz,
        tuning.min_prominence,
        tuning.min_peak_distance,
    )
}
