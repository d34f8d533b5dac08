//! Liveness and readiness handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::api::routes::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    database: &'static str,
}

/// `GET /` — trivial liveness probe, the idiomatic replacement for the
/// original's root route (SPEC_FULL.md §B.4).
pub async fn root() -> &'static str {
    "stream-gateway"
}

/// `GET /health` — reports database connectivity alongside process liveness.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                database: "connected",
            }),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "error",
                database: "unreachable",
            }),
        ),
    }
}
