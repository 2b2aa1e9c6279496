//! Processing Pipeline Module
//!
//! ```text
//! PLC ─▶ AcquisitionLoop (thread) ─▶ SampleRouter ─▶ AnalysisStage
//!                                     │  WindowProcessor   │  FrequencyAnalyzer
//!                                     │  FlawWindowTracker │  ChannelStats
//!                                     ▼                    │  AlarmEngine
//!                               RouterSnapshot             ▼
//!                                              EventSink + lamp command
//!                                              + AnalysisSnapshot
//! ```

mod analysis;
mod coordinator;
mod flaw;
mod router;
mod state;
mod window;

pub use analysis::AnalysisStage;
pub use coordinator::{ConfigStatus, Pipeline, PipelineError, PipelineHandles, ShutdownReport};
pub use flaw::FlawWindowTracker;
pub use router::{DrainReport, RoutedSample, SampleRouter};
pub use state::*;
pub use window::{WindowHistories, WindowProcessor};
