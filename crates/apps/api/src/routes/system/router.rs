use crate::api_state::ApiContext;
use crate::routes::system::handlers::{health_check, system_status_handler};
use axum::routing::get;
use axum::Router;

pub fn system_router() -> Router<ApiContext> {
    Router::new()
        .route("/api/system/status", get(system_status_handler))
        .route("/health", get(health_check))
}
