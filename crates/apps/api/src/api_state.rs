use app_state::AppSettings;
use axum::extract::FromRef;
use sqlx::PgPool;

#[derive(Clone, Debug)]
pub struct ApiContext {
    pub pool: PgPool,
    pub settings: AppSettings,
}

impl FromRef<ApiContext> for PgPool {
    fn from_ref(state: &ApiContext) -> Self {
        state.pool.clone()
    }
}

impl FromRef<ApiContext> for AppSettings {
    fn from_ref(state: &ApiContext) -> Self {
        state.settings.clone()
    }
}
