use crate::infra::{preview, AppState, ApiService, PreviewRequest};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use candidate_scoring::error::AppError;
use candidate_scoring::scoring::{scoring_router, CompositeResult};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_scoring_routes(service: Arc<ApiService>) -> Router {
    scoring_router(service)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/scoring/preview", post(preview_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Score inline components with the live config; nothing is stored.
pub(crate) async fn preview_endpoint(
    Extension(state): Extension<AppState>,
    Json(payload): Json<PreviewRequest>,
) -> Result<Json<CompositeResult>, AppError> {
    let service = &state.service;
    let result = preview(service.engine(), &service.get_config(), payload, Utc::now())?;
    Ok(Json(result))
}
