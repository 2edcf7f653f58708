use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{FromRow, Type};
use utoipa::ToSchema;
use uuid::Uuid;

/// Column list shared by every query that reads a full job record.
pub const JOB_COLUMNS: &str = "id, status, params, priority, progress, submitted_at, \
    started_at, completed_at, replica_id, lease_expires_at, artifact_path, \
    error_kind, error_detail, cancel_requested, retry_count";

#[derive(FromRow, Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub params: Json<VideoParams>,
    pub priority: i32,
    pub progress: Option<f64>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub replica_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub artifact_path: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_detail: Option<String>,
    pub cancel_requested: bool,
    pub retry_count: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, ToSchema)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored classification for jobs that did not complete normally.
///
/// Validation failures never reach the store; they are rejected at the API
/// boundary before a record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, ToSchema)]
#[sqlx(type_name = "error_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Generator,
    Oom,
    Timeout,
    Lost,
    Cancelled,
}

/// Generation parameters in their stored form. The seed is always concrete
/// here; a null seed in the submission is resolved before the record is
/// written so reruns are reproducible.
///
/// Unknown fields read from the store are kept in `extra` and written back
/// verbatim, so records survive rolling upgrades in both directions.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VideoParams {
    pub prompt: String,
    pub num_frames: i32,
    pub num_inference_steps: i32,
    pub guidance_scale: f64,
    pub fps: i32,
    pub width: i32,
    pub height: i32,
    pub seed: i64,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn params_round_trip_unknown_fields() {
        let stored = serde_json::json!({
            "prompt": "a cat walks",
            "num_frames": 84,
            "num_inference_steps": 50,
            "guidance_scale": 7.5,
            "fps": 30,
            "width": 848,
            "height": 480,
            "seed": 42,
            "motion_strength": 0.7
        });
        let params: VideoParams = serde_json::from_value(stored.clone()).unwrap();
        assert_eq!(params.extra.get("motion_strength").unwrap(), 0.7);
        let back = serde_json::to_value(&params).unwrap();
        assert_eq!(back, stored);
    }
}
