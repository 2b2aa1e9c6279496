//! LineGuard: extrusion line supervision
//!
//! Reads a laser diameter scanner through a PLC, tracks lumps and necks over
//! a trailing distance window, detects diameter pulsation and drives five
//! edge-triggered alarms plus a common-fault lamp.
//!
//! ## Architecture
//!
//! - **Acquisition**: dedicated OS thread, owns the PLC link, never blocks
//!   on downstream contexts
//! - **Router**: overload shedding, batching, distance integration and the
//!   flaw window
//! - **Analysis**: spectrum, channel statistics and the alarm engine
//! - **API**: Axum status surface and operator controls

pub mod acquisition;
pub mod alarms;
pub mod api;
pub mod config;
pub mod pipeline;
pub mod plc;
pub mod processing;
pub mod storage;
pub mod types;

pub use config::{ConfigHandle, LineConfig};
pub use pipeline::{Pipeline, PipelineHandles};
pub use types::{AlarmEvent, AlarmKind, Recipe, Sample};
