//! API route definitions
//!
//! - /health - liveness and PLC link state
//! - /api/v1/status - acquisition, router, analysis and config state
//! - /api/v1/alarms - alarm states and lamp
//! - /api/v1/spectrum - latest pulsation spectrum
//! - /api/v1/events - recent alarm transitions
//! - /api/v1/context, /measurement, /recipe - operator controls

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use crate::pipeline::PipelineHandles;

/// Versioned API routes, nested under `/api/v1`.
pub fn api_routes(state: PipelineHandles) -> Router {
    Router::new()
        .route("/status", get(handlers::get_status))
        .route("/alarms", get(handlers::get_alarms))
        .route("/spectrum", get(handlers::get_spectrum))
        .route("/events", get(handlers::get_events))
        .route("/context", post(handlers::set_context))
        .route("/measurement", post(handlers::set_measurement))
        .route("/recipe", post(handlers::set_recipe))
        .with_state(state)
}

/// Root-level health probe.
pub fn health_routes(state: PipelineHandles) -> Router {
    Router::new()
        .route("/health", get(handlers::get_health))
        .with_state(state)
}
