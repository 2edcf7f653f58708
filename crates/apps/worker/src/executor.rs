use crate::context::WorkerContext;
use crate::jobs::heartbeat::start_lease_renewal;
use crate::jobs::management::{
    mark_job_cancelled, mark_job_completed, mark_job_failed, requeue_after_oom, write_progress,
};
use common_services::database::jobs::{ErrorKind, Job};
use common_services::database::DbError;
use sqlx::PgPool;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;
use video_generator::protocol::GeneratorRequest;
use video_generator::{GenerationOutcome, GeneratorError, ProgressSink};

/// Runs one claimed job to a terminal state. The GPU slot is released on
/// every exit path, the guard covers panics and give-ups on the terminal
/// store write alike.
pub async fn run_job(context: &WorkerContext, job: Job, device_id: u32) {
    let _slot = SlotGuard {
        gpu: &context.gpu,
        job_id: job.id,
    };
    execute_claimed(context, job, device_id).await;
}

struct SlotGuard<'a> {
    gpu: &'a crate::gpu::GpuRegistry,
    job_id: Uuid,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.gpu.release(self.job_id);
    }
}

async fn execute_claimed(context: &WorkerContext, job: Job, device_id: u32) {
    let settings = &context.settings;
    let job_id = job.id;

    let lease_handle = start_lease_renewal(
        &context.pool,
        job_id,
        context.replica_id.clone(),
        settings.worker.lease(),
        settings.worker.lease_renewal(),
    );

    let params = &job.params.0;
    let scratch = settings.generator.scratch_path(&job_id.to_string());
    let request = GeneratorRequest {
        prompt: params.prompt.clone(),
        num_frames: params.num_frames,
        num_inference_steps: params.num_inference_steps,
        guidance_scale: params.guidance_scale,
        fps: params.fps,
        width: params.width,
        height: params.height,
        seed: params.seed,
        gpu_index: device_id,
        output_path: scratch.clone(),
        model_cache_dir: settings.generator.model_cache_dir.clone(),
    };

    let mut sink = StoreProgressSink::new(
        context.pool.clone(),
        job_id,
        context.replica_id.clone(),
        settings.worker.progress_interval(),
    );

    let run: Pin<Box<dyn Future<Output = Result<GenerationOutcome, GeneratorError>> + Send + '_>> =
        Box::pin(
            context
                .generator
                .generate(&request, &mut sink, settings.worker.cancel_grace()),
        );
    let outcome = timeout(settings.worker.job_timeout(), run).await;

    lease_handle.abort();

    match outcome {
        // Dropping the generate future kills the child via kill_on_drop.
        Err(_) => {
            warn!("Job {job_id} exceeded the maximum wall time.");
            remove_scratch(&scratch).await;
            finish(
                context,
                job_id,
                Terminal::Failed(
                    ErrorKind::Timeout,
                    "exceeded the maximum job wall time".to_owned(),
                ),
            )
            .await;
        }
        Ok(Ok(GenerationOutcome::Completed { path })) => {
            let artifact = settings.generator.artifact_path(&job_id.to_string());
            match tokio::fs::rename(&path, &artifact).await {
                Ok(()) => {
                    info!("✅ Job {job_id} completed: {}", artifact.display());
                    finish(
                        context,
                        job_id,
                        Terminal::Completed(artifact.to_string_lossy().into_owned()),
                    )
                    .await;
                }
                Err(e) => {
                    remove_scratch(&scratch).await;
                    finish(
                        context,
                        job_id,
                        Terminal::Failed(
                            ErrorKind::Generator,
                            format!("failed to move the artifact into place: {e}"),
                        ),
                    )
                    .await;
                }
            }
        }
        Ok(Ok(GenerationOutcome::Cancelled)) => {
            info!("🛑 Job {job_id} cancelled at a checkpoint.");
            remove_scratch(&scratch).await;
            finish(context, job_id, Terminal::Cancelled).await;
        }
        Ok(Err(GeneratorError::Oom(detail))) if job.retry_count < 1 => {
            warn!("Job {job_id} hit GPU OOM, re-queueing once: {detail}");
            remove_scratch(&scratch).await;
            finish(context, job_id, Terminal::OomRequeue).await;
        }
        Ok(Err(error)) => {
            let (kind, detail) = classify(error);
            warn!("Job {job_id} failed ({kind:?}): {detail}");
            remove_scratch(&scratch).await;
            finish(context, job_id, Terminal::Failed(kind, detail)).await;
        }
    }
}

enum Terminal {
    Completed(String),
    Failed(ErrorKind, String),
    Cancelled,
    OomRequeue,
}

/// Writes the terminal transition with bounded retry. If the store stays down
/// past the budget the record is left as-is; the reconciler will mark the job
/// lost once the lease runs out.
async fn finish(context: &WorkerContext, job_id: Uuid, terminal: Terminal) {
    let pool = &context.pool;
    let replica_id = &context.replica_id;

    let deadline = Instant::now() + context.settings.worker.store_retry();
    let mut attempt: u32 = 0;
    let written = loop {
        let result = match &terminal {
            Terminal::Completed(path) => mark_job_completed(pool, job_id, replica_id, path).await,
            Terminal::Failed(kind, detail) => {
                mark_job_failed(pool, job_id, replica_id, *kind, detail).await
            }
            Terminal::Cancelled => mark_job_cancelled(pool, job_id, replica_id).await,
            Terminal::OomRequeue => requeue_after_oom(pool, job_id, replica_id).await,
        };
        match result {
            Ok(value) => break Some(value),
            Err(e) => {
                attempt += 1;
                let backoff = retry_backoff(attempt);
                if Instant::now() + backoff >= deadline {
                    warn!("Store write failed after {attempt} attempt(s): {e}");
                    break None;
                }
                warn!("Store write failed (attempt {attempt}), retrying: {e}");
                sleep(backoff).await;
            }
        }
    };

    match written {
        Some(true) => {}
        Some(false) => {
            info!("Job {job_id} is no longer owned by this replica; leaving its record alone.");
        }
        None => {
            warn!("Giving up on recording the outcome of job {job_id}; the reconciler will handle it.");
        }
    }
}

fn classify(error: GeneratorError) -> (ErrorKind, String) {
    match error {
        GeneratorError::Oom(detail) => (ErrorKind::Oom, detail),
        GeneratorError::Failed(detail) => (ErrorKind::Generator, detail),
        GeneratorError::Protocol(detail) => (ErrorKind::Generator, detail),
        GeneratorError::Io(e) => (ErrorKind::Generator, format!("generator io error: {e}")),
    }
}

async fn remove_scratch(scratch: &Path) {
    if let Err(e) = tokio::fs::remove_file(scratch).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove scratch file {}: {e}", scratch.display());
    }
}

/// Exponential backoff with jitter, capped at five seconds.
fn retry_backoff(attempt: u32) -> Duration {
    let base = 100u64.saturating_mul(2u64.saturating_pow(attempt.min(6)));
    let jitter = rand::random_range(0..=base / 2);
    Duration::from_millis((base + jitter).min(5_000))
}

/// Progress fan-in from the generator to the store.
///
/// Writes are coalesced to at most one per `min_interval` and kept strictly
/// monotone; a fraction below the last accepted one is discarded. Every write
/// brings back `cancel_requested`, which is how cancellation reaches the
/// generator's checkpoints. Losing ownership of the row reads as a
/// cancellation so the generator stops promptly.
pub struct StoreProgressSink {
    pool: PgPool,
    job_id: Uuid,
    replica_id: String,
    gate: ProgressGate,
    cancelled: bool,
}

impl StoreProgressSink {
    #[must_use]
    pub fn new(pool: PgPool, job_id: Uuid, replica_id: String, min_interval: Duration) -> Self {
        Self {
            pool,
            job_id,
            replica_id,
            gate: ProgressGate::new(min_interval),
            cancelled: false,
        }
    }
}

impl ProgressSink for StoreProgressSink {
    fn report(&mut self, fraction: f64) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let Some(fraction) = self.gate.admit(fraction) else {
                return;
            };
            match write_progress(&self.pool, self.job_id, &self.replica_id, fraction).await {
                Ok(Some(cancel_requested)) => self.cancelled = cancel_requested,
                Ok(None) => {
                    debug!("Job {} is no longer ours, stopping the generator.", self.job_id);
                    self.cancelled = true;
                }
                Err(e) => warn!("Progress write for job {} failed: {e}", self.job_id),
            }
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Decides which reported fractions actually reach the store.
struct ProgressGate {
    min_interval: Duration,
    last_write: Option<Instant>,
    last_value: f64,
}

impl ProgressGate {
    const fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_write: None,
            last_value: 0.0,
        }
    }

    fn admit(&mut self, fraction: f64) -> Option<f64> {
        if !fraction.is_finite() {
            return None;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction < self.last_value {
            return None;
        }
        self.last_value = fraction;
        if self
            .last_write
            .is_some_and(|at| at.elapsed() < self.min_interval)
        {
            return None;
        }
        self.last_write = Some(Instant::now());
        Some(fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_rejects_regressions() {
        let mut gate = ProgressGate::new(Duration::ZERO);
        assert_eq!(gate.admit(0.5), Some(0.5));
        assert_eq!(gate.admit(0.4), None);
        assert_eq!(gate.admit(0.6), Some(0.6));
    }

    #[test]
    fn gate_clamps_out_of_range_values() {
        let mut gate = ProgressGate::new(Duration::ZERO);
        assert_eq!(gate.admit(-0.5), Some(0.0));
        assert_eq!(gate.admit(1.7), Some(1.0));
        assert_eq!(gate.admit(f64::NAN), None);
    }

    #[test]
    fn gate_coalesces_rapid_reports() {
        let mut gate = ProgressGate::new(Duration::from_secs(60));
        assert_eq!(gate.admit(0.1), Some(0.1));
        assert_eq!(gate.admit(0.2), None);
        assert_eq!(gate.admit(0.3), None);
        // Skipped values still raise the floor.
        assert_eq!(gate.last_value, 0.3);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let early = retry_backoff(1);
        assert!(early >= Duration::from_millis(200));
        for attempt in 1..20 {
            assert!(retry_backoff(attempt) <= Duration::from_secs(5));
        }
    }
}
