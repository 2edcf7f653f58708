use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct SystemStatusResponse {
    /// Jobs currently executing across all replicas.
    pub active_jobs: i64,
    /// Jobs waiting in the submission queue.
    pub queue_length: i64,
    pub available_gpus: i64,
    pub total_gpus: i64,
    pub system_load: SystemLoad,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SystemLoad {
    pub replicas: Vec<ReplicaStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReplicaStatus {
    pub replica_id: String,
    pub total_gpus: i32,
    pub available_gpus: i32,
    pub active_jobs: i32,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_jobs: i64,
    pub queue_length: i64,
}
