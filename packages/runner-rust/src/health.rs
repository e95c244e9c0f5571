//! Liveness, readiness and status endpoints.
//!
//! - `GET /health/live`: 200 while the process runs.
//! - `GET /health/ready`: 200 while the source has a running generation, 503 otherwise.
//! - `GET /health`: JSON [`ControllerStatus`] plus uptime.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::StatusHandle;

/// Shared state of the health handlers.
#[derive(Debug, Clone)]
pub struct HealthState {
    pub status: StatusHandle,
    pub start_time: Instant,
}

/// Detailed status as JSON. Always 200; `ready` carries the verdict.
pub async fn health_handler(State(state): State<HealthState>) -> Json<serde_json::Value> {
    let status = state.status.status();
    Json(json!({
        "source": status.source,
        "state": status.state,
        "ready": status.ready,
        "generation": status.generation,
        "live_workers": status.live_workers,
        "intake_stopped": status.intake_stopped,
        "features": status.features,
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

pub async fn readiness_handler(State(state): State<HealthState>) -> StatusCode {
    if state.status.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[must_use]
pub fn router(status: StatusHandle) -> Router {
    let state = HealthState {
        status,
        start_time: Instant::now(),
    };
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the health endpoints until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(
    addr: SocketAddr,
    status: StatusHandle,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "health endpoints listening");
    axum::serve(listener, router(status))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::json;
    use streaming_runner_core::{ObjectKey, SourceDefinition};
    use tower::ServiceExt;

    use super::*;
    use crate::broker::{BrokerRegistry, MemoryBroker};
    use crate::config::ControllerConfig;
    use crate::controller::SourceController;
    use crate::store::MemoryFeatureStore;
    use crate::testing::ScriptedRuntime;
    use crate::watch::SourceEvent;

    fn controller() -> SourceController {
        let mut registry = BrokerRegistry::new();
        registry.register(MemoryBroker::new());
        SourceController::new(
            ObjectKey::new("prod", "clicks"),
            Arc::new(registry),
            Arc::new(ScriptedRuntime::new()),
            Arc::new(MemoryFeatureStore::new()),
            ControllerConfig::default(),
        )
    }

    fn definition() -> SourceDefinition {
        SourceDefinition {
            kind: "streaming".into(),
            namespace: "prod".into(),
            name: "clicks".into(),
            config: json!({"kind": "memory", "topic": "clicks"}),
            features: vec![],
        }
    }

    async fn get(router: Router, path: &str) -> (StatusCode, Vec<u8>) {
        let response = router
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        let c = controller();
        let (status, _) = get(router(c.readiness_handle()), "/health/live").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_follows_controller() {
        let mut c = controller();
        let app = router(c.readiness_handle());

        let (status, _) = get(app.clone(), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        c.handle(SourceEvent::Created(definition())).await;
        let (status, _) = get(app.clone(), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);

        c.shutdown().await;
        let (status, _) = get(app, "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn status_reports_generation_as_json() {
        let mut c = controller();
        c.handle(SourceEvent::Created(definition())).await;

        let (status, body) = get(router(c.readiness_handle()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["source"], "prod/clicks");
        assert_eq!(value["state"], "running");
        assert_eq!(value["ready"], true);
        assert_eq!(value["generation"], 1);
        assert_eq!(value["live_workers"], 1);
        assert!(value["uptime_secs"].is_number());
        c.shutdown().await;
    }
}
