use crate::database::jobs::VideoParams;
use crate::database::DbError;
use bon::builder;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

/// Enqueues a video generation job.
///
/// Creating the pending record and entering the submission queue are the same
/// write: the queue is the set of pending rows, ordered by
/// `(priority DESC, submitted_at, id)`. First write wins on the id, so
/// re-enqueueing an existing job is a safe no-op.
///
/// # Errors
///
/// Returns an error if the insert fails.
#[builder]
pub async fn enqueue_job(
    #[builder(start_fn)] pool: &PgPool,
    #[builder(start_fn)] id: Uuid,
    params: &VideoParams,
    #[builder(default)] priority: i32,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO jobs (id, params, priority) VALUES ($1, $2, $3) \
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(id)
    .bind(Json(params))
    .bind(priority)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        warn!("Not enqueueing job {id}, it already exists.");
        return Ok(false);
    }

    info!(
        "Enqueued job {id}, priority {priority}: {:?}",
        params.prompt.chars().take(50).collect::<String>()
    );

    Ok(true)
}
