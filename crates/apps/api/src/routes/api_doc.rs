use common_services::api::jobs::interfaces::{
    CancelJobResponse, JobListResponse, JobStatusResponse, SubmitJobRequest, SubmitJobResponse,
};
use common_services::api::system::interfaces::{
    HealthResponse, ReplicaStatus, SystemLoad, SystemStatusResponse,
};
use common_services::database::jobs::{ErrorKind, JobStatus, VideoParams};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::root::handlers::root,
        crate::routes::jobs::handlers::submit_job_handler,
        crate::routes::jobs::handlers::job_status_handler,
        crate::routes::jobs::handlers::list_jobs_handler,
        crate::routes::jobs::handlers::cancel_job_handler,
        crate::routes::jobs::handlers::download_handler,
        crate::routes::system::handlers::system_status_handler,
        crate::routes::system::handlers::health_check,
    ),
    components(schemas(
        SubmitJobRequest,
        SubmitJobResponse,
        JobStatusResponse,
        JobListResponse,
        CancelJobResponse,
        SystemStatusResponse,
        SystemLoad,
        ReplicaStatus,
        HealthResponse,
        JobStatus,
        ErrorKind,
        VideoParams,
    )),
    tags(
        (name = "Jobs", description = "Video generation job lifecycle"),
        (name = "System", description = "Aggregate status and liveness"),
    )
)]
pub struct ApiDoc;
