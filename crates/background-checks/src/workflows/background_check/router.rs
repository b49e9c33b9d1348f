use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{CandidateDetails, CheckTier, EmploymentVerificationSubmission, InstanceId};
use super::engine::{CheckEngine, CheckFilter, EngineError};
use crate::error::AppError;

/// Body of `POST /api/v1/checks`. A missing tier means `standard`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCheckRequest {
    pub email: String,
    #[serde(default)]
    pub tier: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelCheckRequest {
    #[serde(default)]
    pub reason: String,
}

/// HTTP surface for hiring staff, candidates and researchers.
pub fn check_router(engine: Arc<CheckEngine>) -> Router {
    Router::new()
        .route("/api/v1/checks", post(create_handler).get(list_handler))
        .route("/api/v1/checks/:id", get(status_handler))
        .route("/api/v1/checks/:id/cancel", post(cancel_handler))
        .route("/api/v1/reports/:token", get(report_handler))
        .route("/api/v1/candidate/:token/accept", post(accept_handler))
        .route("/api/v1/candidate/:token/decline", post(decline_handler))
        .route("/api/v1/researcher/:token", get(researcher_handler))
        .route(
            "/api/v1/researcher/:token/employment-verification",
            post(employment_verification_handler),
        )
        .with_state(engine)
}

fn engine_error(err: EngineError) -> Response {
    AppError::from(err).into_response()
}

pub(crate) async fn create_handler(
    State(engine): State<Arc<CheckEngine>>,
    Json(request): Json<CreateCheckRequest>,
) -> Response {
    let tier = request
        .tier
        .map(CheckTier::from)
        .unwrap_or(CheckTier::Standard);
    match engine.create(&request.email, tier) {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(err) => engine_error(err),
    }
}

pub(crate) async fn list_handler(
    State(engine): State<Arc<CheckEngine>>,
    Query(filter): Query<CheckFilter>,
) -> Response {
    match engine.list(&filter) {
        Ok(checks) => (StatusCode::OK, Json(checks)).into_response(),
        Err(err) => engine_error(err),
    }
}

pub(crate) async fn status_handler(
    State(engine): State<Arc<CheckEngine>>,
    Path(id): Path<String>,
) -> Response {
    match engine.status(&InstanceId(id)) {
        Ok(state) => (StatusCode::OK, Json(state)).into_response(),
        Err(err) => engine_error(err),
    }
}

pub(crate) async fn cancel_handler(
    State(engine): State<Arc<CheckEngine>>,
    Path(id): Path<String>,
    Json(request): Json<CancelCheckRequest>,
) -> Response {
    let id = InstanceId(id);
    match engine.cancel(&id, &request.reason) {
        Ok(()) => {
            let payload = json!({
                "id": id,
                "status": "cancelling",
            });
            (StatusCode::ACCEPTED, Json(payload)).into_response()
        }
        Err(err) => engine_error(err),
    }
}

pub(crate) async fn report_handler(
    State(engine): State<Arc<CheckEngine>>,
    Path(token): Path<String>,
) -> Response {
    match engine.status_by_token(&token) {
        Ok(state) => (StatusCode::OK, Json(state)).into_response(),
        Err(err) => engine_error(err),
    }
}

pub(crate) async fn accept_handler(
    State(engine): State<Arc<CheckEngine>>,
    Path(token): Path<String>,
    Json(candidate): Json<CandidateDetails>,
) -> Response {
    match engine.accept(&token, candidate) {
        Ok(()) => decision_recorded("accepted"),
        Err(err) => engine_error(err),
    }
}

pub(crate) async fn decline_handler(
    State(engine): State<Arc<CheckEngine>>,
    Path(token): Path<String>,
) -> Response {
    match engine.decline(&token) {
        Ok(()) => decision_recorded("declined"),
        Err(err) => engine_error(err),
    }
}

pub(crate) async fn researcher_handler(
    State(engine): State<Arc<CheckEngine>>,
    Path(token): Path<String>,
) -> Response {
    match engine.employment_verification_details(&token) {
        Ok(candidate) => (StatusCode::OK, Json(candidate)).into_response(),
        Err(err) => engine_error(err),
    }
}

pub(crate) async fn employment_verification_handler(
    State(engine): State<Arc<CheckEngine>>,
    Path(token): Path<String>,
    Json(submission): Json<EmploymentVerificationSubmission>,
) -> Response {
    match engine.verify_employment(&token, submission) {
        Ok(()) => decision_recorded("submitted"),
        Err(err) => engine_error(err),
    }
}

fn decision_recorded(decision: &str) -> Response {
    let payload = json!({ "decision": decision });
    (StatusCode::ACCEPTED, Json(payload)).into_response()
}
