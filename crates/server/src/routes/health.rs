//! Liveness endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use supportdesk_shared::ProblemDetails;

use crate::hub::HubStats;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub realtime: HubStats,
}

/// Health check, including live socket counts from the hub.
pub async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<ProblemDetails>)> {
    let realtime = state.hub.stats().await.map_err(|e| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ProblemDetails::service_unavailable(e.to_string())),
        )
    })?;

    Ok(Json(HealthResponse {
        status: "ok",
        service: "supportdesk",
        version: env!("CARGO_PKG_VERSION"),
        realtime,
    }))
}

/// JSON 404 for unknown `/api/*` paths, so they never fall through to the SPA.
pub async fn api_not_found() -> (StatusCode, Json<ProblemDetails>) {
    (
        StatusCode::NOT_FOUND,
        Json(ProblemDetails::not_found("Not found")),
    )
}
