use crate::context::WorkerContext;
use common_services::database::jobs::{ErrorKind, Job, JOB_COLUMNS};
use common_services::database::DbError;
use sqlx::PgPool;
use uuid::Uuid;

/// Atomically claims the head of the submission queue.
///
/// The CTE locks exactly one pending row with SKIP LOCKED, so replicas racing
/// for the same head observe exactly one winner; the losers see the next row
/// or nothing. Flagged-for-cancel rows are left for the reconciler.
pub async fn claim_next_job(context: &WorkerContext) -> Result<Option<Job>, DbError> {
    let job = sqlx::query_as::<_, Job>(&format!(
        "WITH candidate AS (\
            SELECT id FROM jobs \
            WHERE status = 'pending' AND NOT cancel_requested \
            ORDER BY priority DESC, submitted_at, id \
            FOR UPDATE SKIP LOCKED \
            LIMIT 1\
        ) \
        UPDATE jobs \
        SET status = 'processing', replica_id = $1, started_at = now(), \
            lease_expires_at = now() + interval '1 second' * $2, progress = 0 \
        WHERE id = (SELECT id FROM candidate) \
        RETURNING {JOB_COLUMNS}"
    ))
    .bind(&context.replica_id)
    .bind(context.settings.worker.lease().as_secs_f64())
    .fetch_optional(&context.pool)
    .await?;

    Ok(job)
}

/// Undoes a claim whose GPU allocation failed. `submitted_at` stays put, so
/// the job returns to its original queue position.
pub async fn rollback_claim(pool: &PgPool, job_id: Uuid, replica_id: &str) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE jobs \
         SET status = 'pending', replica_id = NULL, started_at = NULL, \
             lease_expires_at = NULL, progress = NULL \
         WHERE id = $1 AND status = 'processing' AND replica_id = $2",
    )
    .bind(job_id)
    .bind(replica_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Re-queues a job after a first out-of-memory failure, spending one retry.
pub async fn requeue_after_oom(pool: &PgPool, job_id: Uuid, replica_id: &str) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE jobs \
         SET status = 'pending', replica_id = NULL, started_at = NULL, \
             lease_expires_at = NULL, progress = NULL, retry_count = retry_count + 1 \
         WHERE id = $1 AND status = 'processing' AND replica_id = $2",
    )
    .bind(job_id)
    .bind(replica_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn mark_job_completed(
    pool: &PgPool,
    job_id: Uuid,
    replica_id: &str,
    artifact_path: &str,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE jobs \
         SET status = 'completed', completed_at = now(), progress = 1, artifact_path = $3, \
             lease_expires_at = NULL, replica_id = NULL, cancel_requested = false \
         WHERE id = $1 AND status = 'processing' AND replica_id = $2",
    )
    .bind(job_id)
    .bind(replica_id)
    .bind(artifact_path)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn mark_job_failed(
    pool: &PgPool,
    job_id: Uuid,
    replica_id: &str,
    kind: ErrorKind,
    detail: &str,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE jobs \
         SET status = 'failed', error_kind = $3, error_detail = $4, completed_at = now(), \
             lease_expires_at = NULL, replica_id = NULL, cancel_requested = false \
         WHERE id = $1 AND status = 'processing' AND replica_id = $2",
    )
    .bind(job_id)
    .bind(replica_id)
    .bind(kind)
    .bind(detail)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn mark_job_cancelled(
    pool: &PgPool,
    job_id: Uuid,
    replica_id: &str,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE jobs \
         SET status = 'cancelled', completed_at = now(), error_kind = 'cancelled', \
             error_detail = 'cancelled at a generation checkpoint', \
             lease_expires_at = NULL, replica_id = NULL, cancel_requested = false \
         WHERE id = $1 AND status = 'processing' AND replica_id = $2",
    )
    .bind(job_id)
    .bind(replica_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Records a progress fraction and reads the cancellation flag in the same
/// round trip. GREATEST keeps the stored value monotone even if writes
/// reorder. Returns None when the job is no longer owned by this replica.
pub async fn write_progress(
    pool: &PgPool,
    job_id: Uuid,
    replica_id: &str,
    fraction: f64,
) -> Result<Option<bool>, DbError> {
    let cancel_requested = sqlx::query_scalar::<_, bool>(
        "UPDATE jobs SET progress = GREATEST(COALESCE(progress, 0), $3) \
         WHERE id = $1 AND status = 'processing' AND replica_id = $2 \
         RETURNING cancel_requested",
    )
    .bind(job_id)
    .bind(replica_id)
    .bind(fraction)
    .fetch_optional(pool)
    .await?;
    Ok(cancel_requested)
}

/// Pushes the lease deadline out. Returns false when the job is no longer
/// owned by this replica (reconciler stole it, or it went terminal).
pub async fn renew_lease(
    pool: &PgPool,
    job_id: Uuid,
    replica_id: &str,
    lease_seconds: f64,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE jobs SET lease_expires_at = now() + interval '1 second' * $3 \
         WHERE id = $1 AND status = 'processing' AND replica_id = $2",
    )
    .bind(job_id)
    .bind(replica_id)
    .bind(lease_seconds)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
