use crate::database::jobs::{Job, JobStatus, JOB_COLUMNS};
use crate::database::DbError;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Read and lifecycle operations on job records.
///
/// Every status transition is a single UPDATE with an expected-status guard;
/// zero affected rows is the compare-and-set conflict signal. Claiming and
/// executor-owned transitions live with the worker, which additionally guards
/// on its own replica id.
pub struct JobStore;

#[derive(FromRow, Debug)]
pub struct QueueCounts {
    pub active_jobs: i64,
    pub queue_length: i64,
}

#[derive(FromRow, Debug)]
pub struct ExpiredJob {
    pub id: Uuid,
    pub artifact_path: Option<String>,
}

impl JobStore {
    pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Job>, DbError> {
        let job = sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(job)
    }

    /// Page through jobs, newest submissions first. Returns the page and the
    /// total row count for the filter.
    pub async fn list(
        pool: &PgPool,
        status: Option<JobStatus>,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Job>, i64), DbError> {
        let offset = (page - 1) * page_size;

        let (jobs, total) = if let Some(status) = status {
            let jobs = sqlx::query_as::<_, Job>(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE status = $1 \
                 ORDER BY submitted_at DESC, id LIMIT $2 OFFSET $3"
            ))
            .bind(status)
            .bind(page_size)
            .bind(offset)
            .fetch_all(pool)
            .await?;
            let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs WHERE status = $1")
                .bind(status)
                .fetch_one(pool)
                .await?;
            (jobs, total)
        } else {
            let jobs = sqlx::query_as::<_, Job>(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs ORDER BY submitted_at DESC, id LIMIT $1 OFFSET $2"
            ))
            .bind(page_size)
            .bind(offset)
            .fetch_all(pool)
            .await?;
            let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs")
                .fetch_one(pool)
                .await?;
            (jobs, total)
        };

        Ok((jobs, total))
    }

    pub async fn counts(pool: &PgPool) -> Result<QueueCounts, DbError> {
        let counts = sqlx::query_as::<_, QueueCounts>(
            "SELECT \
                COUNT(*) FILTER (WHERE status = 'processing') AS active_jobs, \
                COUNT(*) FILTER (WHERE status = 'pending') AS queue_length \
             FROM jobs",
        )
        .fetch_one(pool)
        .await?;
        Ok(counts)
    }

    /// Cancel a job that has not been picked up yet. The row leaves the
    /// pending set, which is also its removal from the submission queue.
    pub async fn cancel_pending(pool: &PgPool, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = 'cancelled', completed_at = now(), cancel_requested = false, \
                 error_kind = 'cancelled', error_detail = 'cancelled before execution started' \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flag a live job for cooperative cancellation, returning the status the
    /// flag landed on. A processing job's executor observes the flag at its
    /// next progress checkpoint; a flagged pending row is swept to cancelled
    /// by the reconciler.
    pub async fn flag_cancel(pool: &PgPool, id: Uuid) -> Result<Option<JobStatus>, DbError> {
        let status = sqlx::query_scalar::<_, JobStatus>(
            "UPDATE jobs SET cancel_requested = true \
             WHERE id = $1 AND status IN ('pending', 'processing') \
             RETURNING status",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(status)
    }

    /// Retention sweep. Returns the deleted rows so callers can remove the
    /// artifacts from disk.
    pub async fn delete_terminal_older_than(
        pool: &PgPool,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ExpiredJob>, DbError> {
        let expired = sqlx::query_as::<_, ExpiredJob>(
            "DELETE FROM jobs \
             WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at < $1 \
             RETURNING id, artifact_path",
        )
        .bind(cutoff)
        .fetch_all(pool)
        .await?;
        Ok(expired)
    }
}
