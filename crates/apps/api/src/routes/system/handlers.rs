use crate::api_state::ApiContext;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use common_services::api::jobs::error::JobsError;
use common_services::api::system::interfaces::{HealthResponse, SystemStatusResponse};
use common_services::api::system::service::system_status;
use common_services::database::JobStore;
use serde_json::{json, Value};
use tracing::{error, instrument};

/// Aggregate view over the queue and every live replica.
///
/// # Errors
///
/// Returns a `JobsError` when the store is unavailable.
#[utoipa::path(
    get,
    path = "/api/system/status",
    tag = "System",
    responses(
        (status = 200, description = "Queue depth, active jobs, and GPU availability.", body = SystemStatusResponse),
        (status = 503, description = "The job store is unavailable."),
    )
)]
#[instrument(skip(context), err(Debug))]
pub async fn system_status_handler(
    State(context): State<ApiContext>,
) -> Result<Json<SystemStatusResponse>, JobsError> {
    let response = system_status(&context.pool).await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    responses(
        (status = 200, description = "API is healthy and ready to accept traffic.", body = HealthResponse),
        (status = 503, description = "API is not healthy, likely due to a store issue."),
    )
)]
pub async fn health_check(
    State(context): State<ApiContext>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<Value>)> {
    match JobStore::counts(&context.pool).await {
        Ok(counts) => Ok(Json(HealthResponse {
            status: "healthy",
            active_jobs: counts.active_jobs,
            queue_length: counts.queue_length,
        })),
        Err(e) => {
            error!("Health check failed: store connection error: {e}");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "error": "store unreachable" })),
            ))
        }
    }
}
