use crate::database::DbError;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::time::Duration;

/// Observability snapshots published by worker replicas. The replica-local
/// GPU registry stays the ground truth; these rows only feed aggregate
/// reporting, so readers always apply a freshness cutoff.
pub struct ReplicaStore;

#[derive(FromRow, Debug, Clone)]
pub struct ReplicaRow {
    pub id: String,
    pub total_gpus: i32,
    pub available_gpus: i32,
    pub active_jobs: i32,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(FromRow, Debug, Default)]
pub struct GpuAggregate {
    pub total_gpus: i64,
    pub available_gpus: i64,
}

impl ReplicaStore {
    pub async fn upsert(
        pool: &PgPool,
        id: &str,
        total_gpus: i32,
        available_gpus: i32,
        active_jobs: i32,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO replicas (id, total_gpus, available_gpus, active_jobs, last_seen_at) \
             VALUES ($1, $2, $3, $4, now()) \
             ON CONFLICT (id) DO UPDATE \
             SET total_gpus = $2, available_gpus = $3, active_jobs = $4, last_seen_at = now()",
        )
        .bind(id)
        .bind(total_gpus)
        .bind(available_gpus)
        .bind(active_jobs)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn aggregate(pool: &PgPool, fresh_within: Duration) -> Result<GpuAggregate, DbError> {
        let aggregate = sqlx::query_as::<_, GpuAggregate>(
            "SELECT \
                COALESCE(SUM(total_gpus), 0)::BIGINT AS total_gpus, \
                COALESCE(SUM(available_gpus), 0)::BIGINT AS available_gpus \
             FROM replicas \
             WHERE last_seen_at > now() - interval '1 second' * $1",
        )
        .bind(fresh_within.as_secs_f64())
        .fetch_one(pool)
        .await?;
        Ok(aggregate)
    }

    pub async fn list_fresh(
        pool: &PgPool,
        fresh_within: Duration,
    ) -> Result<Vec<ReplicaRow>, DbError> {
        let replicas = sqlx::query_as::<_, ReplicaRow>(
            "SELECT id, total_gpus, available_gpus, active_jobs, last_seen_at \
             FROM replicas \
             WHERE last_seen_at > now() - interval '1 second' * $1 \
             ORDER BY id",
        )
        .bind(fresh_within.as_secs_f64())
        .fetch_all(pool)
        .await?;
        Ok(replicas)
    }

    /// Drop rows from replicas that stopped heartbeating, so ghost GPUs never
    /// show up in aggregates.
    pub async fn prune_dead(pool: &PgPool, older_than: Duration) -> Result<u64, DbError> {
        let result =
            sqlx::query("DELETE FROM replicas WHERE last_seen_at < now() - interval '1 second' * $1")
                .bind(older_than.as_secs_f64())
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }
}
