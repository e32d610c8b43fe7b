use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use super::config::ScoringConfig;
use super::domain::{ApplicantId, ComponentUpdate};
use super::lock::LockWait;
use super::repository::{ComponentStore, CompositeSnapshotStore};
use super::service::{ReconciliationService, ScoringError};

/// Seconds a producer should back off after a lock timeout.
const RETRY_AFTER_SECS: &str = "2";

/// Router exposing component intake, recompute and config endpoints.
pub fn scoring_router<C, S>(service: Arc<ReconciliationService<C, S>>) -> Router
where
    C: ComponentStore + ?Sized + 'static,
    S: CompositeSnapshotStore + ?Sized + 'static,
{
    Router::new()
        .route(
            "/api/v1/applicants/:applicant_id/components/:component",
            post(component_handler::<C, S>),
        )
        .route(
            "/api/v1/applicants/:applicant_id/recompute",
            post(recompute_handler::<C, S>),
        )
        .route(
            "/api/v1/applicants/:applicant_id/composite",
            get(snapshot_handler::<C, S>),
        )
        .route(
            "/api/v1/scoring/config",
            get(get_config_handler::<C, S>).put(put_config_handler::<C, S>),
        )
        .with_state(service)
}

pub(crate) async fn component_handler<C, S>(
    State(service): State<Arc<ReconciliationService<C, S>>>,
    Path((applicant_id, component)): Path<(u64, String)>,
    Json(update): Json<ComponentUpdate>,
) -> Response
where
    C: ComponentStore + ?Sized + 'static,
    S: CompositeSnapshotStore + ?Sized + 'static,
{
    match service
        .update_component_and_recompute(
            ApplicantId(applicant_id),
            &component,
            update,
            LockWait::Request,
        )
        .await
    {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn recompute_handler<C, S>(
    State(service): State<Arc<ReconciliationService<C, S>>>,
    Path(applicant_id): Path<u64>,
) -> Response
where
    C: ComponentStore + ?Sized + 'static,
    S: CompositeSnapshotStore + ?Sized + 'static,
{
    match service
        .recompute_now(ApplicantId(applicant_id), LockWait::Request)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn snapshot_handler<C, S>(
    State(service): State<Arc<ReconciliationService<C, S>>>,
    Path(applicant_id): Path<u64>,
) -> Response
where
    C: ComponentStore + ?Sized + 'static,
    S: CompositeSnapshotStore + ?Sized + 'static,
{
    match service.get_snapshot(ApplicantId(applicant_id)) {
        Ok(Some(result)) => (StatusCode::OK, Json(result)).into_response(),
        Ok(None) => {
            let payload = json!({
                "applicant_id": applicant_id,
                "error": "no composite computed yet",
            });
            (StatusCode::NOT_FOUND, Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn get_config_handler<C, S>(
    State(service): State<Arc<ReconciliationService<C, S>>>,
) -> Response
where
    C: ComponentStore + ?Sized + 'static,
    S: CompositeSnapshotStore + ?Sized + 'static,
{
    (StatusCode::OK, Json(service.get_config())).into_response()
}

pub(crate) async fn put_config_handler<C, S>(
    State(service): State<Arc<ReconciliationService<C, S>>>,
    Json(config): Json<ScoringConfig>,
) -> Response
where
    C: ComponentStore + ?Sized + 'static,
    S: CompositeSnapshotStore + ?Sized + 'static,
{
    match service.set_config(config) {
        Ok(config) => (StatusCode::OK, Json(config)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) fn error_response(err: ScoringError) -> Response {
    let retryable = err.is_retryable();
    let payload = json!({
        "error": err.to_string(),
        "retryable": retryable,
    });

    match err {
        ScoringError::Validation(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(payload)).into_response()
        }
        ScoringError::Config(ref config_err) if config_err.is_invalid_input() => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(payload)).into_response()
        }
        ScoringError::LockTimeout(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, RETRY_AFTER_SECS)],
            Json(payload),
        )
            .into_response(),
        _ if retryable => (StatusCode::SERVICE_UNAVAILABLE, Json(payload)).into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response(),
    }
}
