use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
}

async fn healthz() -> impl IntoResponse {
    metrics::counter!("health_checks_total", "endpoint" => "healthz", "status" => "ok")
        .increment(1);
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.healthcheck().await {
        Ok(()) => {
            metrics::counter!(
                "health_checks_total",
                "endpoint" => "readyz",
                "status" => "ok"
            )
            .increment(1);
            (StatusCode::OK, Json(HealthResponse { status: "ready" }))
        }
        Err(_) => {
            metrics::counter!(
                "health_checks_total",
                "endpoint" => "readyz",
                "status" => "error"
            )
            .increment(1);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse { status: "degraded" }),
            )
        }
    }
}

pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
