//! Shared data structures for the extrusion line pipeline
//!
//! This module defines the types that flow between contexts:
//! - Sample: one acquisition cycle, enriched by the router
//! - Recipe: alarm limits and scanner thresholds for the running product
//! - AlarmKind / AlarmState / AlarmEvent: the alarm engine's vocabulary

mod alarm;
mod recipe;
mod sample;

pub use alarm::*;
pub use recipe::*;
pub use sample::*;
