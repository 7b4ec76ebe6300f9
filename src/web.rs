use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::control::{ControlContext, StatusSnapshot};

/// Build the status router
pub fn router(ctx: Arc<ControlContext>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/state", get(state_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Start the status server
pub async fn run_status_server(
    ctx: Arc<ControlContext>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<()>,
) -> anyhow::Result<()> {
    info!("Starting status server on http://{}", listener.local_addr()?);

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    info!("Status server stopped");
    Ok(())
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check handler
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Live state: tally table, relay target and counters
async fn state_handler(State(ctx): State<Arc<ControlContext>>) -> Json<StatusSnapshot> {
    Json(ctx.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::control::ControlSettings;
    use crate::relay::RelayTarget;
    use crate::store::JsonPositionStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(dir: &tempfile::TempDir) -> Router {
        let cameras = vec![Arc::new(Camera::new(0, "10.1.0.31:1259".parse().unwrap()))];
        let settings = ControlSettings {
            ptz_count: 1,
            tally_count: 1,
            command_timeout: Duration::from_secs(1),
            recall_timeout: Duration::from_secs(1),
            tally: None,
            preview_code: 1,
            on_air_mask: 0x01,
            allow_on_air_change: true,
        };
        let store = JsonPositionStore::open(dir.path().join("p.json"), 1, 2).unwrap();
        let ctx = ControlContext::new(cameras, settings, Arc::new(store), RelayTarget::new());
        router(Arc::new(ctx))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let (status, json) = get_json(app(&dir), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_state() {
        let dir = tempfile::tempdir().unwrap();
        let (status, json) = get_json(app(&dir), "/api/state").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["tally_states"], serde_json::json!([0]));
        assert_eq!(json["allow_on_air_change"], true);
        assert_eq!(json["relay_target"], serde_json::Value::Null);
        assert_eq!(json["cameras"][0]["address"], "10.1.0.31:1259");
    }
}
