//! Background alarm event writer
//!
//! The analysis task records transitions through [`QueuedEventSink`], which
//! only enqueues. [`run_event_writer`] drains the queue and runs each backend
//! write on the blocking pool, so a slow database never stalls analysis.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};

use super::EventSink;
use crate::types::AlarmEvent;

/// Live writer counters, shared with the status surface.
#[derive(Debug, Default)]
pub struct EventWriterStats {
    pub queued: AtomicU64,
    pub saved: AtomicU64,
    pub failed: AtomicU64,
    /// Queue full or writer gone
    pub dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventWriterSnapshot {
    pub queued: u64,
    pub saved: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl EventWriterStats {
    pub fn snapshot(&self) -> EventWriterSnapshot {
        EventWriterSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            saved: self.saved.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// [`EventSink`] front that hands events to the writer task.
///
/// `save_event` returns `true` once the event is queued. Reads go straight
/// to the backend.
pub struct QueuedEventSink {
    tx: mpsc::Sender<AlarmEvent>,
    backend: Arc<dyn EventSink>,
    stats: Arc<EventWriterStats>,
}

impl QueuedEventSink {
    pub fn new(
        backend: Arc<dyn EventSink>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<AlarmEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            tx,
            backend,
            stats: Arc::new(EventWriterStats::default()),
        };
        (sink, rx)
    }

    pub fn stats(&self) -> Arc<EventWriterStats> {
        Arc::clone(&self.stats)
    }
}

impl EventSink for QueuedEventSink {
    fn save_event(&self, event: &AlarmEvent) -> bool {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(kind = ?event.kind, transition = ?event.transition, "Event writer queue full, dropping alarm event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(kind = ?event.kind, "Event writer stopped, dropping alarm event");
                false
            }
        }
    }

    fn is_available(&self) -> bool {
        !self.tx.is_closed() && self.backend.is_available()
    }

    fn recent(&self, limit: usize) -> Vec<AlarmEvent> {
        self.backend.recent(limit)
    }

    fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }
}

/// Drain `rx` into `backend` until every [`QueuedEventSink`] is dropped.
pub async fn run_event_writer(
    mut rx: mpsc::Receiver<AlarmEvent>,
    backend: Arc<dyn EventSink>,
    stats: Arc<EventWriterStats>,
) {
    info!(backend = backend.backend_name(), "Event writer started");
    while let Some(event) = rx.recv().await {
        let target = Arc::clone(&backend);
        match tokio::task::spawn_blocking(move || target.save_event(&event)).await {
            Ok(true) => {
                stats.saved.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Event write task failed");
            }
        }
    }
    let s = stats.snapshot();
    info!(saved = s.saved, failed = s.failed, dropped = s.dropped, "Event writer stopped");
}
