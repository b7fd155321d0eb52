//! HTTP surface: `GET /api` assigns, `POST /api` submits.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use runpool_core::types::{ClientRun, ParticipantId, StudyId};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::coordinator::{
    AssignOutcome, CoordinatorError, RejectReason, RunCoordinator, SubmitOutcome,
};

#[derive(Debug, Deserialize)]
pub struct ApiQuery {
    #[serde(rename = "participantId")]
    pub participant_id: String,
    #[serde(rename = "studyId")]
    pub study_id: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable,
    Exhausted,
    Internal(String),
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::Validation(msg) => ApiError::BadRequest(msg),
            CoordinatorError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            CoordinatorError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Unavailable => {
                (StatusCode::CONFLICT, "No runs are available").into_response()
            }
            ApiError::Exhausted => {
                (StatusCode::GONE, "No runs left for participant").into_response()
            }
            ApiError::Internal(msg) => {
                error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        }
    }
}

pub fn router(coordinator: Arc<RunCoordinator>) -> Router {
    Router::new()
        .route("/api", get(assign).post(submit))
        .route("/health", get(health))
        .with_state(coordinator)
}

fn parse_query(
    query: Result<Query<ApiQuery>, QueryRejection>,
) -> Result<(ParticipantId, StudyId), ApiError> {
    let invalid = || ApiError::BadRequest("participantId and/or studyId must be valid".into());
    let Ok(Query(query)) = query else {
        return Err(invalid());
    };
    let participant_id = ParticipantId::parse(&query.participant_id).map_err(|_| invalid())?;
    let study_id = StudyId::parse(&query.study_id).map_err(|_| invalid())?;
    Ok((participant_id, study_id))
}

async fn assign(
    State(coordinator): State<Arc<RunCoordinator>>,
    query: Result<Query<ApiQuery>, QueryRejection>,
) -> Result<Json<ClientRun>, ApiError> {
    let (participant_id, study_id) = parse_query(query)?;
    match coordinator.assign(&participant_id, &study_id).await? {
        AssignOutcome::Assigned(run) => Ok(Json(run)),
        AssignOutcome::Unavailable => Err(ApiError::Unavailable),
        AssignOutcome::Exhausted => Err(ApiError::Exhausted),
    }
}

async fn submit(
    State(coordinator): State<Arc<RunCoordinator>>,
    query: Result<Query<ApiQuery>, QueryRejection>,
    body: Result<Json<ClientRun>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let (participant_id, study_id) = parse_query(query)?;
    let Json(submission) = body.map_err(|rejection| {
        ApiError::BadRequest(format!(
            "Request body not in the correct format: {}",
            rejection.body_text()
        ))
    })?;

    let outcome = coordinator
        .submit(&participant_id, &study_id, submission)
        .await?;
    Ok(Json(match outcome {
        SubmitOutcome::Accepted => SubmitResponse {
            status: "accepted".to_string(),
            reason: None,
        },
        SubmitOutcome::NotApplied(reason) => SubmitResponse {
            status: "not_applied".to_string(),
            reason: Some(RejectReason::as_str(reason).to_string()),
        },
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
