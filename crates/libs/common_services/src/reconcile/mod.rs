use crate::database::{DbError, JobStore, ReplicaStore};
use app_state::AppSettings;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

/// Replica rows that have not heartbeat for this long are dropped.
const DEAD_REPLICA_AFTER: std::time::Duration = std::time::Duration::from_secs(120);

#[derive(Debug, Default)]
pub struct SweepReport {
    pub recovered: Vec<Uuid>,
    pub lost: u64,
    pub stale_cancels: u64,
    pub purged: u64,
    pub dead_replicas: u64,
}

/// One reconciler pass. Every step is a guarded bulk UPDATE or DELETE, so
/// concurrent passes from several replicas cannot double-apply anything.
pub async fn run_sweep(pool: &PgPool, settings: &AppSettings) -> Result<SweepReport, DbError> {
    let mut report = SweepReport {
        recovered: recover_expired(pool, settings.reconciler.max_retries).await?,
        ..SweepReport::default()
    };
    report.lost = fail_lost(pool, settings.reconciler.max_retries).await?;
    report.stale_cancels = expire_stale_cancels(pool).await?;
    report.purged = purge_expired(pool, settings).await?;
    report.dead_replicas = ReplicaStore::prune_dead(pool, DEAD_REPLICA_AFTER).await?;

    if report.lost > 0 {
        warn!("Marked {} orphaned job(s) as lost.", report.lost);
    }
    Ok(report)
}

/// Puts orphaned processing jobs (expired lease, retry budget left) back at
/// their original queue position. `submitted_at` is untouched, which is what
/// preserves the position.
pub async fn recover_expired(pool: &PgPool, max_retries: i32) -> Result<Vec<Uuid>, DbError> {
    let recovered = sqlx::query_scalar::<_, Uuid>(
        "UPDATE jobs \
         SET status = 'pending', replica_id = NULL, started_at = NULL, \
             lease_expires_at = NULL, progress = NULL, retry_count = retry_count + 1 \
         WHERE status = 'processing' AND lease_expires_at < now() AND retry_count < $1 \
         RETURNING id",
    )
    .bind(max_retries)
    .fetch_all(pool)
    .await?;

    for id in &recovered {
        info!("Recovered job {id} from an expired lease, re-queued.");
    }
    Ok(recovered)
}

/// Fails orphaned processing jobs whose retry budget is spent.
pub async fn fail_lost(pool: &PgPool, max_retries: i32) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE jobs \
         SET status = 'failed', error_kind = 'lost', \
             error_detail = 'lease expired and the retry budget is exhausted', \
             completed_at = now(), replica_id = NULL, lease_expires_at = NULL, \
             cancel_requested = false \
         WHERE status = 'processing' AND lease_expires_at < now() AND retry_count >= $1",
    )
    .bind(max_retries)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Converts pending rows that were flagged for cancellation after losing a
/// race with the claim path.
pub async fn expire_stale_cancels(pool: &PgPool) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE jobs \
         SET status = 'cancelled', completed_at = now(), cancel_requested = false, \
             error_kind = 'cancelled', error_detail = 'cancelled before execution started' \
         WHERE status = 'pending' AND cancel_requested",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Retention sweep: drops terminal records past their retention window and
/// removes their artifacts from disk.
pub async fn purge_expired(pool: &PgPool, settings: &AppSettings) -> Result<u64, DbError> {
    let cutoff = Utc::now() - Duration::days(settings.reconciler.retention_days);
    let expired = JobStore::delete_terminal_older_than(pool, cutoff).await?;

    let mut purged = 0;
    for job in expired {
        if let Some(path) = &job.artifact_path
            && let Err(e) = tokio::fs::remove_file(path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove expired artifact {path}: {e}");
        }
        purged += 1;
    }
    Ok(purged)
}
