use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: &'static str,
    pub version: &'static str,
}

/// GET /health - Health check.
///
/// Unauthenticated, for load balancers and health checkers. Fails when the
/// storage backend is unreachable.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let store = state.registry.store();
    store.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        backend: store.backend_name(),
        version: env!("CARGO_PKG_VERSION"),
    }))
}
