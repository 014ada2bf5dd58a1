use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use utoipa::OpenApi;

use crate::{app_state::AppState, openapi::ApiDoc};

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

async fn openapi_yaml() -> impl IntoResponse {
    match ApiDoc::openapi().to_yaml() {
        Ok(yaml) => (StatusCode::OK, yaml),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("YAML error: {e}"),
        ),
    }
}

pub fn openapi_routes() -> Router<AppState> {
    Router::new()
        .route("/api-docs/openapi.json", get(openapi_json))
        .route("/api-docs/openapi.yaml", get(openapi_yaml))
}
