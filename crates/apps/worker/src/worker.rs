use crate::context::WorkerContext;
use crate::executor::run_job;
use crate::jobs::heartbeat::start_replica_heartbeat;
use crate::jobs::management::{claim_next_job, rollback_claim};
use app_state::AppSettings;
use color_eyre::Result;
use common_services::utils::nice_id;
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{info, warn};

pub async fn create_worker(pool: PgPool, settings: AppSettings, stop_on_idle: bool) -> Result<()> {
    let replica_id = nice_id(8);
    info!("🛠️ [Replica ID: {}] Starting.", replica_id);
    let context = Arc::new(WorkerContext::new(pool, settings, replica_id));

    let heartbeat_handle = start_replica_heartbeat(Arc::clone(&context));
    let result = run_dispatcher(context, stop_on_idle).await;
    heartbeat_handle.abort();

    result
}

/// The dispatcher loop: claim the head of the queue, take a GPU slot, hand
/// the job to an executor task. The store is the only synchronization medium
/// with other replicas; the GPU registry and the executor set are local.
pub async fn run_dispatcher(context: Arc<WorkerContext>, stop_on_idle: bool) -> Result<()> {
    let max_concurrent = context.settings.worker.max_concurrent_jobs.max(1);
    let mut executors: JoinSet<()> = JoinSet::new();
    let mut sleeping = false;

    loop {
        while executors.try_join_next().is_some() {}

        if executors.len() >= max_concurrent {
            // At capacity; claiming more would only steal work from other
            // replicas. Wait for an executor to finish.
            executors.join_next().await;
            continue;
        }

        let maybe_job = match claim_next_job(&context).await {
            Ok(maybe_job) => maybe_job,
            Err(e) => {
                warn!("Failed to claim from the queue, backing off: {e}");
                sleep(jittered(context.settings.worker.poll_interval())).await;
                continue;
            }
        };

        let Some(job) = maybe_job else {
            if stop_on_idle && executors.is_empty() {
                info!("Queue drained, stopping.");
                return Ok(());
            }
            if !sleeping {
                sleeping = true;
                info!("💤 No pending jobs, going to sleep...");
            }
            sleep(jittered(context.settings.worker.poll_interval())).await;
            continue;
        };
        sleeping = false;

        let Some(device_id) = context.gpu.acquire(job.id) else {
            // Claimed more than we can host. Put the claim back at its
            // original queue position and back off briefly.
            if let Err(e) = rollback_claim(&context.pool, job.id, &context.replica_id).await {
                warn!("Failed to roll back claim for job {}: {e}", job.id);
            }
            sleep(jittered(context.settings.worker.poll_interval())).await;
            continue;
        };

        info!(
            "🐜 Picked up job {} on GPU {device_id}: {:?}",
            job.id,
            job.params.prompt.chars().take(50).collect::<String>()
        );
        let executor_context = Arc::clone(&context);
        executors.spawn(async move {
            let fut: Pin<Box<dyn Future<Output = ()> + Send + '_>> =
                Box::pin(run_job(&executor_context, job, device_id));
            fut.await;
        });
    }
}

/// Uniform jitter of up to half the interval keeps replicas from polling the
/// store in lockstep.
fn jittered(interval: Duration) -> Duration {
    let base = interval.as_millis() as u64;
    let jitter = rand::random_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        let interval = Duration::from_millis(1000);
        for _ in 0..100 {
            let jittered = jittered(interval);
            assert!(jittered >= interval);
            assert!(jittered <= interval + interval / 2);
        }
    }
}
