//! Health, readiness and metrics endpoints

use crate::state::HasAuthz;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadinessResponse {
    pub status: String,
    pub store: bool,
    pub cache: bool,
}

/// Liveness: the process is up
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    responses((status = 200, description = "Service is alive", body = HealthResponse))
)]
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness: the permission store and the cache both answer a ping
#[utoipa::path(
    get,
    path = "/ready",
    tag = "System",
    responses(
        (status = 200, description = "Ready to serve checks", body = ReadinessResponse),
        (status = 503, description = "A dependency is unavailable", body = ReadinessResponse)
    )
)]
pub async fn ready<S: HasAuthz>(State(state): State<S>) -> impl IntoResponse {
    let (store, cache) = state.check_ready().await;
    let ok = store && cache;
    let status = if ok {
        StatusCode::OK
    } else {
        tracing::warn!(store, cache, "Readiness check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            status: if ok { "ready" } else { "not_ready" }.to_string(),
            store,
            cache,
        }),
    )
}

/// GET /metrics: Prometheus text exposition format
pub async fn metrics(State(handle): State<Arc<Option<PrometheusHandle>>>) -> impl IntoResponse {
    match handle.as_ref() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "Metrics not enabled".to_string()),
    }
}
