//! Operator context and display snapshots
//!
//! Shared between the pipeline contexts and the HTTP handlers. The context
//! labels live in an `ArcSwap` so the router reads them without locking;
//! the snapshots are published through `tokio::sync::watch`.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use super::window::WindowHistories;
use crate::alarms::AlarmStates;
use crate::processing::PulsationReport;
use crate::types::{Sample, DIAMETER_CHANNELS};

// ============================================================================
// Operator Context
// ============================================================================

/// Labels stamped on every routed sample and alarm event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineContext {
    pub batch: String,
    pub product: String,
}

/// Cheap-to-clone handle to the current [`LineContext`].
#[derive(Clone, Default)]
pub struct ContextHandle {
    inner: Arc<ArcSwap<LineContext>>,
}

impl ContextHandle {
    pub fn new(context: LineContext) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(context)),
        }
    }

    pub fn snapshot(&self) -> Arc<LineContext> {
        self.inner.load_full()
    }

    /// Swap in new labels, returning the previous ones.
    pub fn set(&self, context: LineContext) -> Arc<LineContext> {
        self.inner.swap(Arc::new(context))
    }
}

// ============================================================================
// Router
// ============================================================================

/// Router counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub batches: u64,
    pub routed: u64,
    /// Oldest samples discarded by overload shedding
    pub shed: u64,
    pub forwarded: u64,
    /// Samples not forwarded because the analysis channel was full
    pub analysis_dropped: u64,
}

/// What the routing context publishes after every batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouterSnapshot {
    /// Distance coordinate (m)
    pub current_distance: f64,
    pub flaw_window_m: f64,
    pub window_lumps: u64,
    pub window_necks: u64,
    pub total_lumps: u64,
    pub total_necks: u64,
    pub latest: Option<Sample>,
    pub histories: WindowHistories,
    pub stats: RouterStats,
}

// ============================================================================
// Analysis
// ============================================================================

/// What the analysis context publishes after every evaluation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisSnapshot {
    pub alarms: AlarmStates,
    pub pulsation: Option<PulsationReport>,
    pub std_devs: Option<[f64; DIAMETER_CHANNELS]>,
    pub ovality_percent: Option<f64>,
    pub samples_analysed: u64,
    pub events_saved: u64,
    pub events_failed: u64,
    /// Lamp/threshold commands lost to a full command channel
    pub commands_dropped: u64,
    pub sink_available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_swap_returns_previous() {
        let handle = ContextHandle::new(LineContext {
            batch: "B-1".to_string(),
            product: "PVC".to_string(),
        });
        let reader = handle.clone();

        let previous = handle.set(LineContext {
            batch: "B-2".to_string(),
            product: "PVC".to_string(),
        });
        assert_eq!(previous.batch, "B-1");
        assert_eq!(reader.snapshot().batch, "B-2");
    }
}
