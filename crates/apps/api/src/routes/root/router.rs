use crate::api_state::ApiContext;
use crate::routes::root::handlers::root;
use axum::routing::get;
use axum::Router;

pub fn root_router() -> Router<ApiContext> {
    Router::new().route("/", get(root))
}
