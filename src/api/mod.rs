//! HTTP status surface using Axum
//!
//! Read-only views of the running pipeline plus the few operator controls
//! (context labels, measurement switch, recipe). Handlers only touch
//! lock-free handles, so a slow client never stalls acquisition.

pub mod handlers;
mod routes;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::pipeline::PipelineHandles;

/// Build the complete application router.
pub fn create_app(state: PipelineHandles) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes(state.clone()))
        .merge(routes::health_routes(state))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigHandle, LineConfig};
    use crate::pipeline::{Pipeline, PipelineHandles};
    use crate::plc::{SimProfile, SimulatedConnector, SimulatedPlc};
    use crate::storage::{EventSink, MemoryEventSink, MemorySettingsStore, SettingsStore};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn start(settings: Option<Arc<dyn SettingsStore>>) -> (Pipeline, PipelineHandles) {
        let mut config = LineConfig::default();
        config.acquisition.cycle_ms = 5;
        let plc = SimulatedPlc::new(SimProfile::quiet(), 3);
        let events: Arc<dyn EventSink> = Arc::new(MemoryEventSink::new());
        let pipeline = Pipeline::start(
            ConfigHandle::new(config),
            Box::new(SimulatedConnector::new(plc)),
            events,
            settings,
        )
        .unwrap();
        let handles = pipeline.handles();
        (pipeline, handles)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let (pipeline, handles) = start(None);
        let app = create_app(handles);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health = body_json(response).await;
        assert!(health["plc_connected"].is_boolean());

        let response = app
            .oneshot(Request::builder().uri("/api/v1/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        assert_eq!(status["endpoint"], "sim://line-1");
        assert!(status["acquisition"]["cycles"].is_u64());
        assert!(status["analysis"]["alarms"]["lamp"].is_boolean());

        pipeline.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_spectrum_missing_is_404() {
        let (pipeline, handles) = start(None);
        let app = create_app(handles);

        let response = app
            .oneshot(Request::builder().uri("/api/v1/spectrum").body(Body::empty()).unwrap())
            .await
            .unwrap();
        // 64 samples at 5 ms cannot have been analysed yet
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["code"], "NOT_FOUND");

        pipeline.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_context_and_measurement_controls() {
        let (pipeline, handles) = start(None);
        let app = create_app(handles.clone());

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/context",
                serde_json::json!({ "batch": "B-77", "product": "PE-16" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(handles.context.snapshot().batch, "B-77");

        let response = app
            .oneshot(post_json("/api/v1/measurement", serde_json::json!({ "enabled": false })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!handles.acquisition.measurement_enabled());

        pipeline.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_recipe_saved_and_activated() {
        let store: Arc<dyn SettingsStore> = Arc::new(MemorySettingsStore::new());
        let (pipeline, handles) = start(Some(Arc::clone(&store)));
        let app = create_app(handles.clone());

        let response = app
            .oneshot(post_json(
                "/api/v1/recipe",
                serde_json::json!({ "name": "PE-20", "preset_diameter": 20.0, "max_lumps": 5 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let id = body["settings_id"].as_u64().unwrap();

        let active = handles.config.snapshot();
        assert_eq!(active.recipe.name, "PE-20");
        assert_eq!(active.recipe.settings_id, Some(id));
        assert_eq!(store.load(id).unwrap().max_lumps, 5);

        pipeline.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_invalid_recipe_rejected() {
        let (pipeline, handles) = start(None);
        let app = create_app(handles.clone());

        let response = app
            .oneshot(post_json(
                "/api/v1/recipe",
                serde_json::json!({ "name": "bad", "upper_tolerance": -1.0 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["errors"][0].as_str().unwrap().contains("upper_tolerance"));
        assert_eq!(handles.config.snapshot().recipe.name, "default");

        pipeline.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_events_limit() {
        let (pipeline, handles) = start(None);
        let app = create_app(handles);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/events?limit=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["backend"], "memory");
        assert!(body["events"].as_array().unwrap().len() <= 5);

        pipeline.shutdown(Duration::from_secs(1)).await;
    }
}
