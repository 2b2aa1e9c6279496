//! Pipeline Coordinator - wiring and supervision of the three contexts
//!
//! ```text
//! acquisition thread ──mpsc──▶ router task ──mpsc──▶ analysis task ──mpsc──▶ event writer
//!        ▲                                                │
//!        └────────────── command mpsc (lamp, thresholds) ─┘
//! ```
//!
//! All channels are bounded with non-blocking producers. Shutdown cancels
//! the token, clears the acquisition run flag and joins every context with a
//! bounded timeout: tokio tasks still running afterwards are aborted, an
//! acquisition thread stuck in PLC I/O is detached and reported.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::analysis::AnalysisStage;
use super::router::SampleRouter;
use super::state::{AnalysisSnapshot, ContextHandle, LineContext, RouterSnapshot, RouterStats};
use crate::acquisition::{AcquisitionExit, AcquisitionLoop, AcquisitionShared};
use crate::config::watcher::{run_config_watcher, ConfigEvent};
use crate::config::{defaults, ConfigHandle};
use crate::plc::{ConnectionPool, LinkSettings, PlcConnector};
use crate::storage::{
    run_event_writer, EventSink, EventWriterStats, QueuedEventSink, SettingsStore,
};

/// Poll step while waiting for the acquisition thread to finish.
const THREAD_JOIN_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Register layout invalid:\n  - {}", .0.join("\n  - "))]
    Layout(Vec<String>),

    #[error("Failed to spawn acquisition thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Hot-reload bookkeeping for the status surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigStatus {
    pub reloads: u64,
    pub last_error: Option<String>,
    /// Keys changed on disk that only take effect after a restart
    pub restart_pending: BTreeSet<String>,
}

/// Everything the HTTP surface reads or pokes while the pipeline runs.
#[derive(Clone)]
pub struct PipelineHandles {
    pub config: ConfigHandle,
    pub context: ContextHandle,
    pub acquisition: Arc<AcquisitionShared>,
    pub router: watch::Receiver<RouterSnapshot>,
    pub analysis: watch::Receiver<AnalysisSnapshot>,
    pub config_status: watch::Receiver<ConfigStatus>,
    pub events: Arc<dyn EventSink>,
    pub event_writer: Arc<EventWriterStats>,
    pub settings: Option<Arc<dyn SettingsStore>>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// How each context ended during shutdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShutdownReport {
    pub router: Option<RouterStats>,
    pub samples_analysed: Option<u64>,
    /// Tasks still running at the deadline and aborted
    pub aborted_tasks: usize,
    /// `None` when the acquisition thread had to be detached
    pub acquisition: Option<String>,
}

enum StageExit {
    Router(RouterStats),
    Analysis(u64),
    Aux,
}

/// A running pipeline. Dropping it without [`shutdown`](Self::shutdown)
/// leaves the acquisition thread running.
pub struct Pipeline {
    handles: PipelineHandles,
    cancel: CancellationToken,
    tasks: JoinSet<StageExit>,
    acquisition: Option<thread::JoinHandle<AcquisitionExit>>,
    acquisition_exit: Option<oneshot::Receiver<AcquisitionExit>>,
}

impl Pipeline {
    /// Wire the channels, spawn the acquisition thread and the router,
    /// analysis and config-watcher tasks. Must be called inside a tokio
    /// runtime.
    pub fn start(
        config: ConfigHandle,
        connector: Box<dyn PlcConnector>,
        events: Arc<dyn EventSink>,
        settings: Option<Arc<dyn SettingsStore>>,
    ) -> Result<Self, PipelineError> {
        let cfg = config.snapshot();
        let layout_errors = cfg.plc.layout.validate();
        if !layout_errors.is_empty() {
            return Err(PipelineError::Layout(layout_errors));
        }

        let cancel = CancellationToken::new();
        let shared = Arc::new(AcquisitionShared::default());
        let context = ContextHandle::new(LineContext {
            batch: cfg.production.batch.clone(),
            product: cfg.production.product.clone(),
        });

        let (sample_tx, sample_rx) = mpsc::channel(cfg.acquisition.channel_capacity);
        let (routed_tx, routed_rx) = mpsc::channel(cfg.router.analysis_capacity);
        let (command_tx, command_rx) = mpsc::channel(cfg.acquisition.command_capacity);
        let (router_snap_tx, router_snap_rx) = watch::channel(RouterSnapshot::default());
        let (analysis_snap_tx, analysis_snap_rx) = watch::channel(AnalysisSnapshot::default());
        let (config_status_tx, config_status_rx) = watch::channel(ConfigStatus::default());

        let pool = ConnectionPool::new(
            connector,
            LinkSettings {
                layout: cfg.plc.layout.clone(),
                data_block: cfg.plc.data_block,
                busy_retries: cfg.acquisition.busy_retries,
                busy_backoff: Duration::from_millis(cfg.acquisition.busy_backoff_ms),
            },
        );
        let acquisition = AcquisitionLoop::new(
            pool,
            cfg.plc.endpoint.clone(),
            config.clone(),
            sample_tx,
            command_rx,
            Arc::clone(&shared),
            cancel.clone(),
        );
        let (exit_tx, exit_rx) = oneshot::channel();
        let acquisition_thread = acquisition.spawn(Some(exit_tx))?;

        let mut tasks = JoinSet::new();

        let router = SampleRouter::new(
            sample_rx,
            routed_tx,
            config.clone(),
            context.clone(),
            router_snap_tx,
        );
        let router_cancel = cancel.clone();
        tasks.spawn(async move { StageExit::Router(router.run(router_cancel).await) });

        let (queued_events, event_rx) =
            QueuedEventSink::new(Arc::clone(&events), defaults::EVENT_QUEUE_CAPACITY);
        let event_writer = queued_events.stats();
        tasks.spawn({
            let backend = Arc::clone(&events);
            let stats = Arc::clone(&event_writer);
            async move {
                run_event_writer(event_rx, backend, stats).await;
                StageExit::Aux
            }
        });

        let analysis = AnalysisStage::new(
            routed_rx,
            command_tx,
            config.clone(),
            Arc::new(queued_events),
            analysis_snap_tx,
        );
        let analysis_cancel = cancel.clone();
        tasks.spawn(async move { StageExit::Analysis(analysis.run(analysis_cancel).await) });

        if config.path().is_some() {
            let (event_tx, event_rx) = mpsc::channel(8);
            tasks.spawn({
                let handle = config.clone();
                let cancel = cancel.clone();
                async move {
                    run_config_watcher(handle, event_tx, cancel).await;
                    StageExit::Aux
                }
            });
            tasks.spawn(async move {
                track_config_events(event_rx, config_status_tx).await;
                StageExit::Aux
            });
        }

        info!(
            endpoint = %cfg.plc.endpoint,
            cycle_ms = cfg.acquisition.cycle_ms,
            sink = events.backend_name(),
            "Pipeline started"
        );

        Ok(Self {
            handles: PipelineHandles {
                config,
                context,
                acquisition: shared,
                router: router_snap_rx,
                analysis: analysis_snap_rx,
                config_status: config_status_rx,
                events,
                event_writer,
                settings,
                started_at: chrono::Utc::now(),
            },
            cancel,
            tasks,
            acquisition: Some(acquisition_thread),
            acquisition_exit: Some(exit_rx),
        })
    }

    pub fn handles(&self) -> PipelineHandles {
        self.handles.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolve when the acquisition loop ends on its own (connectivity
    /// budget spent, channel closed). Pending forever once taken.
    pub async fn acquisition_finished(&mut self) -> AcquisitionExit {
        match self.acquisition_exit.take() {
            Some(rx) => match rx.await {
                Ok(exit) => exit,
                Err(_) => AcquisitionExit::Stopped,
            },
            None => std::future::pending::<AcquisitionExit>().await,
        }
    }

    /// Stop every context, waiting at most `timeout` for each group.
    pub async fn shutdown(mut self, timeout: Duration) -> ShutdownReport {
        info!(timeout_ms = timeout.as_millis() as u64, "Pipeline shutting down");
        self.cancel.cancel();
        self.handles.acquisition.stop();

        let mut report = ShutdownReport::default();

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(Ok(exit))) => match exit {
                    StageExit::Router(stats) => report.router = Some(stats),
                    StageExit::Analysis(n) => report.samples_analysed = Some(n),
                    StageExit::Aux => {}
                },
                Ok(Some(Err(e))) => error!(error = %e, "Pipeline task failed"),
                Ok(None) => break,
                Err(_) => {
                    report.aborted_tasks = self.tasks.len();
                    warn!(tasks = report.aborted_tasks, "Tasks did not stop in time, aborting");
                    self.tasks.abort_all();
                    break;
                }
            }
        }

        if let Some(handle) = self.acquisition.take() {
            report.acquisition = join_thread(handle, timeout).await.map(|exit| format!("{exit:?}"));
            if report.acquisition.is_none() {
                warn!("Acquisition thread still blocked in PLC I/O, detaching it");
            }
        }

        info!(?report, "Pipeline stopped");
        report
    }
}

/// Wait for a std thread without blocking the runtime.
async fn join_thread(
    handle: thread::JoinHandle<AcquisitionExit>,
    timeout: Duration,
) -> Option<AcquisitionExit> {
    let started = Instant::now();
    while !handle.is_finished() {
        if started.elapsed() >= timeout {
            return None;
        }
        tokio::time::sleep(THREAD_JOIN_POLL).await;
    }
    match handle.join() {
        Ok(exit) => Some(exit),
        Err(_) => {
            error!("Acquisition thread panicked");
            None
        }
    }
}

async fn track_config_events(
    mut rx: mpsc::Receiver<ConfigEvent>,
    status: watch::Sender<ConfigStatus>,
) {
    while let Some(event) = rx.recv().await {
        status.send_modify(|s| match event {
            ConfigEvent::Reloaded(changes) => {
                s.reloads += 1;
                s.last_error = None;
                s.restart_pending.extend(
                    changes
                        .into_iter()
                        .filter(|c| c.requires_restart)
                        .map(|c| c.key),
                );
            }
            ConfigEvent::Error(e) => s.last_error = Some(e),
        });
    }
}
