use crate::api::jobs::error::JobsError;
use crate::api::jobs::interfaces::{
    JobListResponse, JobStatusResponse, ListJobsParams, SubmitJobRequest, DEFAULT_PAGE_SIZE,
    MAX_PAGE_SIZE,
};
use crate::database::jobs::{Job, JobStatus};
use crate::database::JobStore;
use crate::queue::enqueue_job;
use axum::body::Body;
use axum::http::{header, StatusCode};
use color_eyre::eyre::eyre;
use http::Response;
use sqlx::PgPool;
use tokio::fs::File;
use tokio_util::codec::{BytesCodec, FramedRead};
use tracing::warn;
use uuid::Uuid;

/// Validates the submission, writes the pending record and thereby enqueues
/// it. Nothing is written when validation fails, so a rejected submission
/// leaves no orphan ids behind.
pub async fn submit_job(pool: &PgPool, body: serde_json::Value) -> Result<Job, JobsError> {
    let request: SubmitJobRequest = serde_json::from_value(body)
        .map_err(|e| JobsError::Validation(format!("invalid request body: {e}")))?;
    request.validate().map_err(JobsError::Validation)?;

    let (params, priority) = request.into_params();
    let id = Uuid::new_v4();

    let inserted = enqueue_job(pool, id)
        .params(&params)
        .priority(priority)
        .call()
        .await?;
    if !inserted {
        return Err(JobsError::Internal(eyre!("job id collision on {id}")));
    }

    JobStore::get(pool, id)
        .await?
        .ok_or_else(|| JobsError::Internal(eyre!("job {id} vanished after insert")))
}

pub async fn get_job(pool: &PgPool, id: Uuid) -> Result<Job, JobsError> {
    JobStore::get(pool, id)
        .await?
        .ok_or(JobsError::NotFound(id))
}

pub async fn list_jobs(
    pool: &PgPool,
    params: ListJobsParams,
    public_url: &str,
) -> Result<JobListResponse, JobsError> {
    let page = params.page.unwrap_or(1);
    let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page < 1 {
        return Err(JobsError::Validation("page must be at least 1".to_owned()));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(JobsError::Validation(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let (jobs, total) = JobStore::list(pool, params.status_filter, page, page_size).await?;
    let jobs = jobs
        .into_iter()
        .map(|job| JobStatusResponse::from_job(job, public_url))
        .collect();

    Ok(JobListResponse {
        jobs,
        page,
        page_size,
        total_pages: total_pages(total, page_size),
        total,
    })
}

/// Cancels a job. Pending jobs are cancelled immediately; processing jobs get
/// the cooperative flag and stop at the executor's next checkpoint. Returns
/// the status observed at the moment the cancellation took hold.
pub async fn cancel_job(pool: &PgPool, id: Uuid) -> Result<JobStatus, JobsError> {
    let job = get_job(pool, id).await?;
    if job.status.is_terminal() {
        return Err(JobsError::AlreadyTerminal(job.status));
    }

    if job.status == JobStatus::Pending && JobStore::cancel_pending(pool, id).await? {
        return Ok(JobStatus::Cancelled);
    }

    // The job moved between our read and the CAS. Flag whatever it is now;
    // a flagged pending row is swept to cancelled by the reconciler.
    if let Some(status) = JobStore::flag_cancel(pool, id).await? {
        return Ok(status);
    }

    // It raced all the way into a terminal state.
    let job = get_job(pool, id).await?;
    Err(JobsError::AlreadyTerminal(job.status))
}

/// Streams the artifact of a completed job.
pub async fn download_artifact(pool: &PgPool, id: Uuid) -> Result<Response<Body>, JobsError> {
    let job = get_job(pool, id).await?;
    if job.status != JobStatus::Completed {
        return Err(JobsError::NotCompleted(job.status));
    }
    let Some(artifact_path) = &job.artifact_path else {
        warn!("Completed job {id} has no artifact path");
        return Err(JobsError::ArtifactMissing);
    };

    let file = match File::open(artifact_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Artifact missing on disk for job {id}: {artifact_path}");
            return Err(JobsError::ArtifactMissing);
        }
        Err(e) => {
            return Err(JobsError::Internal(
                color_eyre::Report::new(e).wrap_err("Failed to open artifact"),
            ))
        }
    };

    let stream = FramedRead::new(file, BytesCodec::new());
    let body = Body::from_stream(stream);
    let disposition = format!("attachment; filename=\"{id}.mp4\"");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(body)
        .map_err(|e| JobsError::Internal(color_eyre::Report::new(e).wrap_err("Failed to build response")))
}

const fn total_pages(total: i64, page_size: i64) -> i64 {
    (total + page_size - 1) / page_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(1, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(100, 10), 10);
    }
}
