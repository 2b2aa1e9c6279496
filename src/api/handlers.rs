//! API route handlers
//!
//! Every handler reads from [`PipelineHandles`]: watch receivers for the
//! router and analysis snapshots, atomics for acquisition, and the
//! `ArcSwap` handles for config and operator context. None of them block a
//! pipeline context.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::acquisition::AcquisitionStats;
use crate::alarms::AlarmStates;
use crate::pipeline::{
    AnalysisSnapshot, ConfigStatus, LineContext, PipelineHandles, RouterSnapshot,
};
use crate::processing::PulsationReport;
use crate::storage::EventWriterSnapshot;
use crate::types::{AlarmEvent, Recipe};

/// Upper bound for `GET /events?limit=`
const MAX_EVENT_PAGE: usize = 500;
const DEFAULT_EVENT_PAGE: usize = 50;

// ============================================================================
// Errors
// ============================================================================

/// JSON error body: `{ "code": "...", "message": "...", "errors": [...] }`
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: message.into(),
            errors: Vec::new(),
        }
    }

    pub fn validation(errors: Vec<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_FAILED",
            message: "Recipe validation failed".to_string(),
            errors,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "STORAGE_UNAVAILABLE",
            message: message.into(),
            errors: Vec::new(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

// ============================================================================
// Health Endpoint
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" when the PLC link is up, "degraded" otherwise
    pub status: &'static str,
    pub plc_connected: bool,
    pub acquisition_running: bool,
    pub timestamp: DateTime<Utc>,
}

/// GET /health - liveness plus PLC link state
pub async fn get_health(State(state): State<PipelineHandles>) -> Json<HealthResponse> {
    let connected = state.acquisition.is_connected();
    Json(HealthResponse {
        status: if connected { "ok" } else { "degraded" },
        plc_connected: connected,
        acquisition_running: state.acquisition.is_running(),
        timestamp: Utc::now(),
    })
}

// ============================================================================
// Status Endpoint
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub line: String,
    pub endpoint: String,
    pub context: LineContext,
    pub recipe: Recipe,
    pub acquisition: AcquisitionStats,
    pub router: RouterSnapshot,
    pub analysis: AnalysisSnapshot,
    pub config: ConfigStatus,
    pub event_backend: &'static str,
    pub event_writer: EventWriterSnapshot,
    pub uptime_secs: i64,
}

/// GET /api/v1/status - full pipeline state
pub async fn get_status(State(state): State<PipelineHandles>) -> Json<StatusResponse> {
    let cfg = state.config.snapshot();
    Json(StatusResponse {
        line: cfg.line.name.clone(),
        endpoint: cfg.plc.endpoint.clone(),
        context: LineContext::clone(&state.context.snapshot()),
        recipe: cfg.recipe.clone(),
        acquisition: state.acquisition.snapshot(),
        router: state.router.borrow().clone(),
        analysis: state.analysis.borrow().clone(),
        config: state.config_status.borrow().clone(),
        event_backend: state.events.backend_name(),
        event_writer: state.event_writer.snapshot(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /api/v1/alarms - current alarm states and lamp
pub async fn get_alarms(State(state): State<PipelineHandles>) -> Json<AlarmStates> {
    Json(state.analysis.borrow().alarms)
}

/// GET /api/v1/spectrum - latest pulsation analysis
pub async fn get_spectrum(
    State(state): State<PipelineHandles>,
) -> Result<Json<PulsationReport>, ApiError> {
    state
        .analysis
        .borrow()
        .pulsation
        .clone()
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No spectrum computed yet"))
}

// ============================================================================
// Events Endpoint
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub backend: &'static str,
    pub available: bool,
    pub events: Vec<AlarmEvent>,
}

/// GET /api/v1/events?limit=N - most recent alarm transitions, newest first
pub async fn get_events(
    State(state): State<PipelineHandles>,
    Query(query): Query<EventsQuery>,
) -> Json<EventsResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_PAGE).min(MAX_EVENT_PAGE);
    Json(EventsResponse {
        backend: state.events.backend_name(),
        available: state.events.is_available(),
        events: state.events.recent(limit),
    })
}

// ============================================================================
// Operator Controls
// ============================================================================

/// POST /api/v1/context - change batch/product labels
///
/// A new batch label resets the flaw window on the next routed batch.
pub async fn set_context(
    State(state): State<PipelineHandles>,
    Json(context): Json<LineContext>,
) -> Json<LineContext> {
    let previous = state.context.set(context.clone());
    info!(
        batch = %context.batch,
        product = %context.product,
        previous_batch = %previous.batch,
        "Operator context changed"
    );
    Json(context)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MeasurementRequest {
    pub enabled: bool,
}

/// POST /api/v1/measurement - switch acquisition publishing on or off
pub async fn set_measurement(
    State(state): State<PipelineHandles>,
    Json(request): Json<MeasurementRequest>,
) -> Json<MeasurementRequest> {
    state.acquisition.set_measurement_enabled(request.enabled);
    info!(enabled = request.enabled, "Measurement switched");
    Json(MeasurementRequest {
        enabled: state.acquisition.measurement_enabled(),
    })
}

/// POST /api/v1/recipe - validate, persist and activate a recipe
///
/// The settings store assigns a fresh id; without a store the recipe is
/// activated with no id. Scanner thresholds reach the PLC through the
/// analysis context once the new config is visible.
pub async fn set_recipe(
    State(state): State<PipelineHandles>,
    Json(mut recipe): Json<Recipe>,
) -> Result<Json<Recipe>, ApiError> {
    let errors = recipe.validate();
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    recipe.settings_id = None;
    if let Some(store) = &state.settings {
        match store.save(&recipe) {
            Ok(id) => recipe.settings_id = Some(id),
            Err(e) => {
                warn!(error = %e, backend = store.backend_name(), "Failed to persist recipe");
                return Err(ApiError::unavailable(format!("Failed to persist recipe: {e}")));
            }
        }
    }

    match state.config.set_recipe(recipe.clone()) {
        Ok(changes) => {
            info!(
                name = %recipe.name,
                settings_id = ?recipe.settings_id,
                changed = changes.len(),
                "Recipe activated"
            );
            Ok(Json(recipe))
        }
        Err(crate::config::ConfigError::Validation(errors)) => Err(ApiError::validation(errors)),
        Err(e) => Err(ApiError::validation(vec![e.to_string()])),
    }
}
