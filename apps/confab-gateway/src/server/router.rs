use std::time::Duration;

use axum::{http::header::CONTENT_TYPE, response::IntoResponse, routing::get, Json, Router};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::{
    core::{AppState, GatewayConfig},
    handle::GatewayHandle,
    metrics::render_metrics,
    realtime::{gateway_ws, spawn_idle_sweep, spawn_sfu_event_task},
};

const HTTP_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Builds the gateway router alone. Collaborator-facing operations go
/// through [`build_gateway`], which also returns the handle.
///
/// # Errors
/// Fails when state initialization (token key material) fails.
pub fn build_router(config: &GatewayConfig) -> anyhow::Result<Router> {
    Ok(build_gateway(config)?.0)
}

/// Builds the router plus the [`GatewayHandle`] used by the surrounding
/// service tier to seed users/channels and deliver collaborator
/// notifications.
///
/// # Errors
/// Fails when state initialization (token key material) fails.
pub fn build_gateway(config: &GatewayConfig) -> anyhow::Result<(Router, GatewayHandle)> {
    let (state, sfu_events) = AppState::new(config)?;

    state.track_background_task(spawn_sfu_event_task(state.clone(), sfu_events));
    state.track_background_task(spawn_idle_sweep(state.clone(), config.idle_sweep_interval));

    let router = Router::new()
        .route("/ws", get(gateway_ws))
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(
                    HTTP_REQUEST_TIMEOUT_SECS,
                )))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state.clone());

    Ok((router, GatewayHandle::new(state)))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics_text() -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render_metrics(),
    )
}
