use crate::api_state::ApiContext;
use crate::routes::jobs::handlers::{
    cancel_job_handler, download_handler, job_status_handler, list_jobs_handler,
    submit_job_handler,
};
use axum::routing::{delete, get, post};
use axum::Router;

pub fn jobs_router() -> Router<ApiContext> {
    Router::new()
        .route("/api/jobs/submit", post(submit_job_handler))
        .route("/api/jobs/list", get(list_jobs_handler))
        .route("/api/jobs/{id}/status", get(job_status_handler))
        .route("/api/jobs/{id}/download", get(download_handler))
        .route("/api/jobs/{id}", delete(cancel_job_handler))
}
