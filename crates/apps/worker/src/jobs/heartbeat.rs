use crate::context::WorkerContext;
use crate::jobs::management::renew_lease;
use common_services::database::ReplicaStore;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

/// Spawns a background task that renews the job's lease until ownership is
/// lost. Transient store errors are tolerated; the lease stays valid for a
/// while after a missed renewal.
#[must_use]
pub fn start_lease_renewal(
    pool: &PgPool,
    job_id: Uuid,
    replica_id: String,
    lease: Duration,
    renewal: Duration,
) -> JoinHandle<()> {
    let pool = pool.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(renewal);
        interval.tick().await;
        loop {
            interval.tick().await;
            match renew_lease(&pool, job_id, &replica_id, lease.as_secs_f64()).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => warn!("Lease renewal for job {job_id} failed, will retry: {e}"),
            }
        }
    })
}

/// Spawns the replica's observability heartbeat: a periodic upsert of the GPU
/// registry snapshot into the replicas table.
#[must_use]
pub fn start_replica_heartbeat(context: Arc<WorkerContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(context.settings.worker.replica_heartbeat());
        loop {
            interval.tick().await;
            let snapshot = context.gpu.snapshot();
            let active = i32::try_from(snapshot.allocations.len()).unwrap_or(i32::MAX);
            let result = ReplicaStore::upsert(
                &context.pool,
                &context.replica_id,
                i32::try_from(snapshot.total).unwrap_or(i32::MAX),
                i32::try_from(snapshot.available).unwrap_or(i32::MAX),
                active,
            )
            .await;
            if let Err(e) = result {
                warn!("Replica heartbeat failed: {e}");
            }
        }
    })
}
