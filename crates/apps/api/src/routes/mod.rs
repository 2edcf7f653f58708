mod api_doc;
pub mod jobs;
pub mod root;
pub mod system;

use crate::api_state::ApiContext;
use crate::routes::api_doc::ApiDoc;
use crate::routes::jobs::router::jobs_router;
use crate::routes::root::router::root_router;
use crate::routes::system::router::system_router;
use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub fn create_router(api_state: ApiContext) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .merge(root_router())
        .merge(jobs_router())
        .merge(system_router())
        .with_state(api_state)
}
