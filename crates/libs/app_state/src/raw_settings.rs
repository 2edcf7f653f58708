use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct RawSettings {
    pub api: ApiSettings,
    pub worker: WorkerSettings,
    pub generator: RawGeneratorSettings,
    pub reconciler: ReconcilerSettings,
    pub logging: LoggingSettings,
    pub secrets: SecretSettings,
}

/// Configuration for the API server.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    pub host: String,
    pub port: u16,
    pub public_url: String,
    pub allowed_origins: Vec<String>,
}

/// Per-replica execution limits and timing knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerSettings {
    /// Executor cap per replica. Never above `gpu_slots` in practice since
    /// every executor holds one GPU slot for the job's duration.
    pub max_concurrent_jobs: usize,
    /// Number of GPU devices this replica advertises.
    pub gpu_slots: u32,
    /// Lease duration asserted when claiming a job; renewed at a third of it.
    pub lease_seconds: u64,
    pub poll_interval_ms: u64,
    /// Minimum wall time between two progress writes for the same job.
    pub progress_interval_ms: u64,
    /// Max wall time a job may run from `started_at`.
    pub job_timeout_seconds: u64,
    /// How long a cancelled generator gets to stop at its own checkpoint
    /// before it is killed.
    pub cancel_grace_seconds: u64,
    /// How long terminal-state writes are retried against a flaky store
    /// before giving up and letting the reconciler mark the job lost.
    pub store_retry_seconds: u64,
    pub replica_heartbeat_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawGeneratorSettings {
    /// Command line for the generator child process, split on whitespace.
    pub command: String,
    pub model_cache_dir: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcilerSettings {
    pub sweep_interval_seconds: u64,
    /// Retry budget for jobs whose lease expired (crashed replicas).
    pub max_retries: i32,
    pub retention_days: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecretSettings {
    pub database_url: String,
}
