use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use veriflow_queue::Broker;
use veriflow_store::VerificationStore;

#[derive(Clone)]
pub struct HealthState {
    pub store: Arc<dyn VerificationStore>,
    pub broker: Arc<dyn Broker>,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}

async fn health(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    if let Err(e) = state.store.ping().await {
        warn!(error = %e, "Health check: store unavailable");
        return unavailable("store", e.to_string());
    }
    if let Err(e) = state.broker.ping().await {
        warn!(error = %e, "Health check: broker unavailable");
        return unavailable("broker", e.to_string());
    }
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

fn unavailable(component: &str, error: String) -> (StatusCode, Json<Value>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "status": "unavailable", "component": component, "error": error })),
    )
}

/// Serve the health router until `shutdown` is cancelled.
pub async fn serve(port: u16, state: HealthState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Health endpoint listening on {addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
