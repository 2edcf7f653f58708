use crate::database::jobs::JobStatus;
use crate::database::DbError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use color_eyre::eyre;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JobsError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("job already finished with status: {0}")]
    AlreadyTerminal(JobStatus),

    #[error("job is not completed, current status: {0}")]
    NotCompleted(JobStatus),

    #[error("artifact file is missing")]
    ArtifactMissing,

    #[error("store unavailable")]
    StoreUnavailable(#[source] sqlx::Error),

    #[error("internal error")]
    Internal(#[from] eyre::Report),
}

impl From<DbError> for JobsError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlx(e) => Self::StoreUnavailable(e),
            DbError::NotFound => Self::Internal(eyre::eyre!("row vanished mid-query")),
            DbError::InvalidInput(msg) => Self::Validation(msg),
        }
    }
}

impl IntoResponse for JobsError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": msg, "error_kind": "validation" }),
            ),
            Self::NotFound(id) => (
                StatusCode::NOT_FOUND,
                json!({ "error": format!("Job not found: {id}") }),
            ),
            Self::AlreadyTerminal(job_status) => (
                StatusCode::CONFLICT,
                json!({ "error": self.to_string(), "status": job_status }),
            ),
            Self::NotCompleted(job_status) => (
                StatusCode::CONFLICT,
                json!({ "error": self.to_string(), "status": job_status }),
            ),
            Self::ArtifactMissing => (
                StatusCode::NOT_FOUND,
                json!({ "error": "Artifact file not found" }),
            ),
            Self::StoreUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "The job store is unavailable." }),
            ),
            Self::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "An unexpected internal error occurred." }),
            ),
        };

        (status, Json(body)).into_response()
    }
}
