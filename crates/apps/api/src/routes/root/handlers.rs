use axum::Json;
use serde_json::{json, Value};

#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service banner with the endpoint map.")
    )
)]
pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "Text-to-Video API",
        "endpoints": {
            "submit_job": "/api/jobs/submit",
            "job_status": "/api/jobs/{job_id}/status",
            "list_jobs": "/api/jobs/list",
            "cancel_job": "/api/jobs/{job_id}",
            "download_video": "/api/jobs/{job_id}/download",
            "system_status": "/api/system/status",
            "health": "/health",
        }
    }))
}
