use crate::api::jobs::error::JobsError;
use crate::api::system::interfaces::{ReplicaStatus, SystemLoad, SystemStatusResponse};
use crate::database::{JobStore, ReplicaStore};
use sqlx::PgPool;
use std::time::Duration;

/// Replica rows older than this are treated as gone when aggregating.
pub const REPLICA_FRESHNESS: Duration = Duration::from_secs(30);

pub async fn system_status(pool: &PgPool) -> Result<SystemStatusResponse, JobsError> {
    let counts = JobStore::counts(pool).await?;
    let aggregate = ReplicaStore::aggregate(pool, REPLICA_FRESHNESS).await?;
    let replicas = ReplicaStore::list_fresh(pool, REPLICA_FRESHNESS).await?;

    let replicas = replicas
        .into_iter()
        .map(|row| ReplicaStatus {
            replica_id: row.id,
            total_gpus: row.total_gpus,
            available_gpus: row.available_gpus,
            active_jobs: row.active_jobs,
            last_seen_at: row.last_seen_at,
        })
        .collect();

    Ok(SystemStatusResponse {
        active_jobs: counts.active_jobs,
        queue_length: counts.queue_length,
        available_gpus: aggregate.available_gpus,
        total_gpus: aggregate.total_gpus,
        system_load: SystemLoad { replicas },
    })
}
