//! HTTP server for health and metrics endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use k2s_core::health::{ComponentStatus, HealthCheck, HealthStatus};
use k2s_core::kafka::OffsetTracker;
use k2s_core::metrics::SyncMetrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Shared state for HTTP endpoints.
pub struct ServerState {
    pub health: Arc<HealthCheck>,
    pub metrics: Arc<SyncMetrics>,
    pub offsets: Arc<OffsetTracker>,
}

/// Health response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_since_last_commit: Option<u64>,
    pub uncommitted_partitions: usize,
    pub components: BTreeMap<String, ComponentStatusResponse>,
}

/// Component status response.
#[derive(Debug, Serialize)]
pub struct ComponentStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&ComponentStatus> for ComponentStatusResponse {
    fn from(status: &ComponentStatus) -> Self {
        let (status, message) = match status {
            ComponentStatus::Healthy => ("healthy", None),
            ComponentStatus::Degraded(msg) => ("degraded", Some(msg.clone())),
            ComponentStatus::Unhealthy(msg) => ("unhealthy", Some(msg.clone())),
            ComponentStatus::Unknown => ("unknown", None),
        };
        ComponentStatusResponse {
            status: status.to_string(),
            message,
        }
    }
}

/// Routes for `/health`, `/healthz` and `/readyz`.
pub fn health_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Route for `/metrics`.
pub fn metrics_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Start the HTTP servers for health and metrics.
pub async fn start_server(
    state: Arc<ServerState>,
    health_port: u16,
    metrics_port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let health_addr = SocketAddr::from(([0, 0, 0, 0], health_port));
    let health_listener = match tokio::net::TcpListener::bind(health_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port = health_port, "Failed to bind health server");
            return;
        }
    };
    info!(port = health_port, "Health server started");

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
    let metrics_listener = match tokio::net::TcpListener::bind(metrics_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port = metrics_port, "Failed to bind metrics server");
            return;
        }
    };
    info!(port = metrics_port, "Metrics server started");

    let health_server = async {
        axum::serve(health_listener, health_router(Arc::clone(&state)))
            .await
            .map_err(|e| error!(error = %e, "Health server error"))
    };

    let metrics_server = async {
        axum::serve(metrics_listener, metrics_router(Arc::clone(&state)))
            .await
            .map_err(|e| error!(error = %e, "Metrics server error"))
    };

    tokio::select! {
        _ = health_server => {}
        _ = metrics_server => {}
        _ = shutdown_rx.recv() => {
            info!("HTTP servers shutting down");
        }
    }
}

/// Health endpoint handler.
async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let overall = state.health.overall_status();

    let components = state
        .health
        .statuses()
        .iter()
        .map(|(component, status)| (component.name().to_string(), status.into()))
        .collect();

    let response = HealthResponse {
        status: overall.as_str().to_string(),
        running: state.health.is_running(),
        seconds_since_last_commit: state.health.since_last_commit().map(|d| d.as_secs()),
        uncommitted_partitions: state.offsets.uncommitted_partitions(),
        components,
    };

    let status_code = match overall {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(response))
}

/// Kubernetes liveness probe handler.
async fn healthz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.health.overall_status() != HealthStatus::Unhealthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Kubernetes readiness probe handler.
async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics endpoint handler.
async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    match state.metrics.export_text() {
        Ok(body) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            body,
        ),
        Err(e) => {
            error!(error = %e, "Failed to export metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                e.to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use k2s_core::health::Component;
    use tower::ServiceExt;

    fn state() -> Arc<ServerState> {
        Arc::new(ServerState {
            health: Arc::new(HealthCheck::new()),
            metrics: Arc::new(SyncMetrics::new().unwrap()),
            offsets: Arc::new(OffsetTracker::new()),
        })
    }

    async fn get_status(router: Router, path: &str) -> StatusCode {
        router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    async fn get_body(router: Router, path: &str) -> String {
        let response = router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_component_status_conversion() {
        let response: ComponentStatusResponse = (&ComponentStatus::Healthy).into();
        assert_eq!(response.status, "healthy");
        assert!(response.message.is_none());

        let response: ComponentStatusResponse =
            (&ComponentStatus::Degraded("create failed".to_string())).into();
        assert_eq!(response.status, "degraded");
        assert_eq!(response.message, Some("create failed".to_string()));

        let response: ComponentStatusResponse = (&ComponentStatus::Unknown).into();
        assert_eq!(response.status, "unknown");
    }

    #[tokio::test]
    async fn test_readiness_follows_loop_state() {
        let state = state();
        assert_eq!(
            get_status(health_router(state.clone()), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.health.set_running(true);
        state.health.mark_degraded(Component::Store, "503");
        assert_eq!(
            get_status(health_router(state.clone()), "/readyz").await,
            StatusCode::OK
        );
        assert_eq!(
            get_status(health_router(state.clone()), "/healthz").await,
            StatusCode::OK
        );

        state.health.mark_unhealthy(Component::Log, "poll failed");
        assert_eq!(
            get_status(health_router(state.clone()), "/health").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_health_body_lists_components() {
        let state = state();
        state.health.mark_degraded(Component::Store, "503");

        let body = get_body(health_router(state), "/health").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["components"]["store"]["message"], "503");
        assert_eq!(json["components"]["log"]["status"], "unknown");
        assert_eq!(json["uncommitted_partitions"], 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_exports_registry() {
        let state = state();
        state.metrics.record_batch(4);

        let body = get_body(metrics_router(state), "/metrics").await;
        assert!(body.contains("k2s_messages_total 4"));
    }
}
