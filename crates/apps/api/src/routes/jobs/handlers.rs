use crate::api_state::ApiContext;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use common_services::api::jobs::error::JobsError;
use common_services::api::jobs::interfaces::{
    CancelJobResponse, JobListResponse, JobStatusResponse, ListJobsParams, SubmitJobRequest,
    SubmitJobResponse,
};
use common_services::api::jobs::service::{
    cancel_job, download_artifact, get_job, list_jobs, submit_job,
};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

/// Submit a new video generation job.
///
/// # Errors
///
/// Returns a `JobsError` on invalid parameters or when the store is down.
#[utoipa::path(
    post,
    path = "/api/jobs/submit",
    tag = "Jobs",
    request_body = SubmitJobRequest,
    responses(
        (status = 201, description = "Job accepted and queued.", body = SubmitJobResponse),
        (status = 400, description = "Validation failed; every violation is listed."),
        (status = 503, description = "The job store is unavailable."),
    )
)]
#[instrument(skip(context, body), err(Debug))]
pub async fn submit_job_handler(
    State(context): State<ApiContext>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), JobsError> {
    let job = submit_job(&context.pool, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitJobResponse {
            job_id: job.id,
            status: job.status,
            submitted_at: job.submitted_at,
        }),
    ))
}

/// Fetch the full record of a job.
///
/// # Errors
///
/// Returns a `JobsError` when the job does not exist.
#[utoipa::path(
    get,
    path = "/api/jobs/{id}/status",
    tag = "Jobs",
    params(("id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "The authoritative job record.", body = JobStatusResponse),
        (status = 404, description = "No such job."),
    )
)]
#[instrument(skip(context), err(Debug))]
pub async fn job_status_handler(
    State(context): State<ApiContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, JobsError> {
    let job = get_job(&context.pool, id).await?;
    Ok(Json(JobStatusResponse::from_job(
        job,
        &context.settings.api.public_url,
    )))
}

/// List jobs, newest submissions first.
///
/// # Errors
///
/// Returns a `JobsError` on out-of-range pagination parameters.
#[utoipa::path(
    get,
    path = "/api/jobs/list",
    tag = "Jobs",
    params(ListJobsParams),
    responses(
        (status = 200, description = "One page of jobs.", body = JobListResponse),
        (status = 400, description = "Bad pagination parameters."),
    )
)]
#[instrument(skip(context), err(Debug))]
pub async fn list_jobs_handler(
    State(context): State<ApiContext>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<JobListResponse>, JobsError> {
    let response = list_jobs(&context.pool, params, &context.settings.api.public_url).await?;
    Ok(Json(response))
}

/// Request cancellation of a job.
///
/// Pending jobs are cancelled immediately; processing jobs stop cooperatively
/// at the executor's next checkpoint.
///
/// # Errors
///
/// Returns a `JobsError` when the job is unknown or already terminal.
#[utoipa::path(
    delete,
    path = "/api/jobs/{id}",
    tag = "Jobs",
    params(("id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "Cancellation took hold; body carries the observed status.", body = CancelJobResponse),
        (status = 404, description = "No such job."),
        (status = 409, description = "The job already reached a terminal state."),
    )
)]
#[instrument(skip(context), err(Debug))]
pub async fn cancel_job_handler(
    State(context): State<ApiContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelJobResponse>, JobsError> {
    let status = cancel_job(&context.pool, id).await?;
    Ok(Json(CancelJobResponse { status }))
}

/// Download the artifact of a completed job.
///
/// # Errors
///
/// Returns a `JobsError` when the job is unknown, not completed, or the
/// artifact is missing from disk.
#[utoipa::path(
    get,
    path = "/api/jobs/{id}/download",
    tag = "Jobs",
    params(("id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "The video artifact.", body = Vec<u8>, content_type = "video/mp4"),
        (status = 404, description = "No such job, or the artifact is gone."),
        (status = 409, description = "The job is not completed; body carries its current status."),
    )
)]
#[instrument(skip(context), err(Debug))]
pub async fn download_handler(
    State(context): State<ApiContext>,
    Path(id): Path<Uuid>,
) -> Result<Response<Body>, JobsError> {
    download_artifact(&context.pool, id).await
}
