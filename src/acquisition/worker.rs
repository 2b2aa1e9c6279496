//! Acquisition loop: fixed-cadence PLC polling on a dedicated thread
//!
//! Each cycle:
//! 1. Skip if measurement is disabled (re-arms the initial counter reset)
//! 2. Ensure a live link via the pool (one attempt, backoff on failure)
//! 3. Initial counter reset + threshold write once per enable transition
//! 4. After a reconnect, re-assert the last commanded lamp state
//! 5. Apply pending commands from the analysis context (lamp, thresholds)
//! 6. Read the block, compute deltas, publish with `try_send`
//! 7. Reset the hardware counters when they run high or sit still
//! 8. Read the control byte back as a liveness check
//!
//! Any PLC error tears the link down; the next cycle reconnects.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{AcquisitionShared, CounterTracker, ResetOutcome};
use crate::config::{defaults, ConfigHandle, LineConfig};
use crate::plc::{ConnectionPool, ControlBits, PlcError, PlcLink};
use crate::types::Sample;

/// Sleep granularity, so a stop request is noticed within one slice.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Requests from the analysis context, applied by the acquisition thread
/// because it is the only owner of the PLC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AcquisitionCommand {
    /// Switch the common-fault lamp
    SetCommonFault(bool),
    /// Write the scanner's lump/neck detection thresholds (mm)
    WriteThresholds { lump: f32, neck: f32 },
}

/// Why the acquisition loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionExit {
    /// Run flag cleared or cancellation requested
    Stopped,
    /// The router dropped its receiver
    ChannelClosed,
    /// Consecutive connection failures reached `max_reconnect_failures`
    ConnectivityLost { attempts: u32 },
}

enum CycleOutcome {
    Continue,
    ChannelClosed,
}

/// Rate-limited "sample dropped" warning.
#[derive(Default)]
struct DropLog {
    last: Option<Instant>,
    suppressed: u64,
}

impl DropLog {
    fn record(&mut self) {
        self.suppressed += 1;
        let interval = Duration::from_millis(defaults::DROP_LOG_INTERVAL_MS);
        if self.last.map_or(true, |t| t.elapsed() >= interval) {
            warn!(dropped = self.suppressed, "Acquisition channel full, dropping samples");
            self.last = Some(Instant::now());
            self.suppressed = 0;
        }
    }
}

/// The acquisition context. Build with [`new`](Self::new), then
/// [`spawn`](Self::spawn) it onto its own thread.
pub struct AcquisitionLoop {
    pool: ConnectionPool,
    endpoint: String,
    config: ConfigHandle,
    samples: mpsc::Sender<Sample>,
    commands: mpsc::Receiver<AcquisitionCommand>,
    shared: Arc<AcquisitionShared>,
    cancel: CancellationToken,
    tracker: CounterTracker,
    initial_reset_needed: bool,
    /// Lamp state last commanded by the analysis context
    lamp: Option<bool>,
    lamp_resync_needed: bool,
    connect_failures: u32,
    drop_log: DropLog,
}

impl AcquisitionLoop {
    pub fn new(
        pool: ConnectionPool,
        endpoint: impl Into<String>,
        config: ConfigHandle,
        samples: mpsc::Sender<Sample>,
        commands: mpsc::Receiver<AcquisitionCommand>,
        shared: Arc<AcquisitionShared>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            endpoint: endpoint.into(),
            config,
            samples,
            commands,
            shared,
            cancel,
            tracker: CounterTracker::new(),
            initial_reset_needed: true,
            lamp: None,
            lamp_resync_needed: false,
            connect_failures: 0,
            drop_log: DropLog::default(),
        }
    }

    /// Run the loop on a dedicated, named OS thread.
    ///
    /// The exit reason is also sent on `exit`, if given, so async code can
    /// await it without joining the thread.
    pub fn spawn(
        self,
        exit: Option<oneshot::Sender<AcquisitionExit>>,
    ) -> std::io::Result<thread::JoinHandle<AcquisitionExit>> {
        thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || {
                let reason = self.run();
                if let Some(tx) = exit {
                    let _ = tx.send(reason);
                }
                reason
            })
    }

    /// Run the loop on the current thread until stopped.
    pub fn run(mut self) -> AcquisitionExit {
        info!(endpoint = %self.endpoint, "Acquisition loop started");

        let exit = loop {
            if self.stop_requested() {
                break AcquisitionExit::Stopped;
            }

            let started = Instant::now();
            let cfg = self.config.snapshot();
            let period = Duration::from_millis(cfg.acquisition.cycle_ms);
            self.shared.cycles.fetch_add(1, Ordering::Relaxed);

            if !self.shared.measurement_enabled() {
                if !self.initial_reset_needed {
                    info!("Measurement disabled, counters will be re-primed on enable");
                }
                self.initial_reset_needed = true;
                self.pace(started, period);
                continue;
            }

            let fresh = match self.pool.acquire(&self.endpoint) {
                Ok((_, fresh)) => fresh,
                Err(e) => {
                    self.shared.connected.store(false, Ordering::Relaxed);
                    self.connect_failures += 1;
                    warn!(
                        endpoint = %self.endpoint,
                        attempt = self.connect_failures,
                        error = %e,
                        "PLC connection failed"
                    );
                    if let Some(max) = cfg.acquisition.max_reconnect_failures {
                        if self.connect_failures >= max {
                            error!(
                                endpoint = %self.endpoint,
                                attempts = self.connect_failures,
                                "PLC unreachable, giving up"
                            );
                            break AcquisitionExit::ConnectivityLost {
                                attempts: self.connect_failures,
                            };
                        }
                    }
                    self.sleep_while_running(Duration::from_millis(
                        cfg.acquisition.reconnect_backoff_ms,
                    ));
                    continue;
                }
            };
            if fresh {
                if self.shared.connected.swap(true, Ordering::Relaxed) {
                    warn!(endpoint = %self.endpoint, "PLC link dropped between cycles, reconnected");
                }
                self.shared.reconnects.fetch_add(1, Ordering::Relaxed);
                self.lamp_resync_needed = true;
            }
            self.connect_failures = 0;

            match self.cycle(&cfg) {
                Ok(CycleOutcome::Continue) => {}
                Ok(CycleOutcome::ChannelClosed) => break AcquisitionExit::ChannelClosed,
                Err(e) => {
                    self.shared.io_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(endpoint = %self.endpoint, error = %e, "PLC I/O failed, dropping connection");
                    self.disconnect();
                }
            }

            if self.shared.is_connected() {
                let alive = self
                    .pool
                    .cached(&self.endpoint)
                    .is_some_and(|link| link.read_control().is_ok());
                if !alive {
                    warn!(endpoint = %self.endpoint, "PLC liveness check failed, dropping connection");
                    self.disconnect();
                }
            }

            self.pace(started, period);
        };

        self.disconnect();
        info!(?exit, "Acquisition loop stopped");
        exit
    }

    fn cycle(&mut self, cfg: &LineConfig) -> Result<CycleOutcome, PlcError> {
        let acq = &cfg.acquisition;
        let (link, _) = self.pool.acquire(&self.endpoint)?;

        if self.initial_reset_needed {
            let outcome = reset_counters(link, acq.reset_attempts)?;
            note_reset(&self.shared, &mut self.tracker, outcome);
            link.write_thresholds(cfg.recipe.lump_threshold, cfg.recipe.neck_threshold)?;
            self.initial_reset_needed = false;
            info!(
                lump_threshold = cfg.recipe.lump_threshold,
                neck_threshold = cfg.recipe.neck_threshold,
                "Counters primed and thresholds written"
            );
        }

        if self.lamp_resync_needed {
            if let Some(on) = self.lamp {
                if link.control().contains(ControlBits::COMMON_FAULT) != on {
                    link.set_common_fault(on)?;
                    info!(lamp = on, "Common-fault lamp re-asserted after reconnect");
                }
            }
            self.lamp_resync_needed = false;
        }

        apply_commands(link, &mut self.commands, &self.shared, &mut self.lamp)?;

        let block = link.read_block()?;
        let deltas = self.tracker.update(block.lumps, block.necks);
        let (total_lumps, total_necks) = self.tracker.totals();
        self.shared.total_lumps.store(total_lumps, Ordering::Relaxed);
        self.shared.total_necks.store(total_necks, Ordering::Relaxed);

        let mut sample = Sample::new(Utc::now(), block.diameters);
        sample.raw_lumps = block.lumps;
        sample.raw_necks = block.necks;
        sample.lumps_delta = deltas.lumps;
        sample.necks_delta = deltas.necks;
        sample.speed = block.speed;
        sample.status = block.status;
        sample.status_word = block.status_word;
        sample.lump_threshold_echo = block.lump_threshold;
        sample.neck_threshold_echo = block.neck_threshold;

        match self.samples.try_send(sample) {
            Ok(()) => {
                self.shared.samples_published.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                self.shared.samples_dropped.fetch_add(1, Ordering::Relaxed);
                self.drop_log.record();
            }
            Err(TrySendError::Closed(_)) => return Ok(CycleOutcome::ChannelClosed),
        }

        if let Some(reason) = self.tracker.reset_due(
            block.lumps,
            block.necks,
            acq.counter_high_water,
            acq.stable_cycles_before_reset,
        ) {
            debug!(?reason, lumps = block.lumps, necks = block.necks, "Resetting hardware counters");
            let outcome = reset_counters(link, acq.reset_attempts)?;
            note_reset(&self.shared, &mut self.tracker, outcome);
        }

        Ok(CycleOutcome::Continue)
    }

    fn disconnect(&mut self) {
        self.pool.release(&self.endpoint);
        self.shared.connected.store(false, Ordering::Relaxed);
    }

    fn stop_requested(&self) -> bool {
        !self.shared.is_running() || self.cancel.is_cancelled()
    }

    /// Sleep out the rest of the cycle period.
    fn pace(&self, started: Instant, period: Duration) {
        let elapsed = started.elapsed();
        if elapsed < period {
            self.sleep_while_running(period - elapsed);
        } else {
            self.shared.overruns.fetch_add(1, Ordering::Relaxed);
            debug!(elapsed_ms = elapsed.as_millis(), "Acquisition cycle overran its period");
        }
    }

    fn sleep_while_running(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.stop_requested() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Assert reset bits, clear them, read back and verify zero; up to
/// `attempts` times.
fn reset_counters(link: &mut PlcLink, attempts: u32) -> Result<ResetOutcome, PlcError> {
    let mut last = (0, 0);
    for attempt in 1..=attempts {
        link.set_counter_reset(true)?;
        link.set_counter_reset(false)?;
        let block = link.read_block()?;
        if block.lumps == 0 && block.necks == 0 {
            return Ok(ResetOutcome::Cleared { attempts: attempt });
        }
        debug!(attempt, lumps = block.lumps, necks = block.necks, "Counters did not clear");
        last = (block.lumps, block.necks);
    }
    Ok(ResetOutcome::Failed {
        lumps: last.0,
        necks: last.1,
    })
}

fn note_reset(shared: &AcquisitionShared, tracker: &mut CounterTracker, outcome: ResetOutcome) {
    match outcome {
        ResetOutcome::Cleared { attempts } => {
            shared.counter_resets.fetch_add(1, Ordering::Relaxed);
            debug!(attempts, "Hardware counters cleared");
        }
        ResetOutcome::Failed { lumps, necks } => {
            shared.failed_resets.fetch_add(1, Ordering::Relaxed);
            error!(lumps, necks, "Counter reset failed on every attempt, adopting PLC values as baseline");
        }
    }
    tracker.rebaseline(outcome);
}

fn apply_commands(
    link: &mut PlcLink,
    commands: &mut mpsc::Receiver<AcquisitionCommand>,
    shared: &AcquisitionShared,
    lamp: &mut Option<bool>,
) -> Result<(), PlcError> {
    while let Ok(command) = commands.try_recv() {
        match command {
            AcquisitionCommand::SetCommonFault(on) => {
                *lamp = Some(on);
                link.set_common_fault(on)?;
            }
            AcquisitionCommand::WriteThresholds { lump, neck } => link.write_thresholds(lump, neck)?,
        }
        shared.commands_applied.fetch_add(1, Ordering::Relaxed);
        debug!(?command, "PLC command applied");
    }
    Ok(())
}
