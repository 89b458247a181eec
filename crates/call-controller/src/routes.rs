//! HTTP routes for the Call Controller.
//!
//! Combines the signaling socket, the meeting API and the operational
//! endpoints into one Axum router.

use crate::api::{api_router, ApiState};
use crate::observability::{health_router, HealthState};
use crate::signaling::{signaling_router, SignalingState};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Everything the routes need.
#[derive(Clone)]
pub struct AppState {
    pub signaling: SignalingState,
    pub api: ApiState,
    pub health: Arc<HealthState>,
}

/// Build the application routes.
///
/// - `/ws` - WebSocket signaling
/// - `/api/meetings`, `/api/meetings/:meeting_id` - meeting records
/// - `/health`, `/ready` - liveness and readiness probes
/// - `/metrics` - Prometheus metrics
/// - TraceLayer for request logging
pub fn build_routes(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    signaling_router(state.signaling)
        .merge(api_router(state.api))
        .merge(health_router(state.health))
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
}

async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{CallControllerHandle, CallServices};
    use crate::config::MediaConfig;
    use crate::media::LocalMediaEngine;
    use crate::presence::PresenceDirectory;
    use crate::signaling::EventRouter;
    use crate::store::InMemorySessionStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::time::Duration;
    use tower::ServiceExt;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[tokio::test]
    async fn test_operational_routes_are_mounted() {
        let store = Arc::new(InMemorySessionStore::new());
        let presence = PresenceDirectory::new();
        let services = CallServices::new(
            store.clone(),
            Arc::new(LocalMediaEngine::new(MediaConfig::default())),
            presence.clone(),
            Duration::from_secs(40),
        );
        let controller = CallControllerHandle::new("cc-routes".to_string(), services);
        let health = Arc::new(HealthState::new("cc-routes"));
        health.set_ready();

        let app = build_routes(
            AppState {
                signaling: SignalingState {
                    router: EventRouter::new(controller, presence),
                    client_channel_buffer: 16,
                },
                api: ApiState { store },
                health,
            },
            PrometheusBuilder::new().build_recorder().handle(),
        );

        for uri in ["/health", "/ready", "/metrics"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
        }

        // Plain GET without upgrade headers is rejected by the extractor
        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
