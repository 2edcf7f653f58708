use crate::database::jobs::{ErrorKind, Job, JobStatus, VideoParams};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

pub const PROMPT_MAX_CHARS: usize = 2000;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Submission body. Unknown fields are rejected so typos surface as
/// validation errors instead of silently ignored options.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SubmitJobRequest {
    pub prompt: String,
    #[serde(default = "defaults::num_frames")]
    pub num_frames: i32,
    #[serde(default = "defaults::num_inference_steps")]
    pub num_inference_steps: i32,
    #[serde(default = "defaults::guidance_scale")]
    pub guidance_scale: f64,
    #[serde(default = "defaults::fps")]
    pub fps: i32,
    #[serde(default = "defaults::width")]
    pub width: i32,
    #[serde(default = "defaults::height")]
    pub height: i32,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub priority: i32,
}

mod defaults {
    pub const fn num_frames() -> i32 {
        84
    }
    pub const fn num_inference_steps() -> i32 {
        50
    }
    pub const fn guidance_scale() -> f64 {
        7.5
    }
    pub const fn fps() -> i32 {
        30
    }
    pub const fn width() -> i32 {
        848
    }
    pub const fn height() -> i32 {
        480
    }
}

impl SubmitJobRequest {
    /// Checks every constraint and reports all violations at once, so a bad
    /// request does not need several round trips to fix.
    pub fn validate(&self) -> Result<(), String> {
        let mut violations: Vec<String> = Vec::new();

        let prompt_chars = self.prompt.chars().count();
        if prompt_chars < 1 || prompt_chars > PROMPT_MAX_CHARS {
            violations.push(format!(
                "prompt length must be between 1 and {PROMPT_MAX_CHARS} characters"
            ));
        }
        if !(1..=163).contains(&self.num_frames) {
            violations.push("num_frames must be between 1 and 163".to_owned());
        }
        if !(10..=100).contains(&self.num_inference_steps) {
            violations.push("num_inference_steps must be between 10 and 100".to_owned());
        }
        if !(1.0..=20.0).contains(&self.guidance_scale) {
            violations.push("guidance_scale must be between 1.0 and 20.0".to_owned());
        }
        if !(1..=60).contains(&self.fps) {
            violations.push("fps must be between 1 and 60".to_owned());
        }
        if !(256..=1024).contains(&self.width) || self.width % 64 != 0 {
            violations.push("width must be between 256 and 1024 and a multiple of 64".to_owned());
        }
        if !(256..=1024).contains(&self.height) || self.height % 64 != 0 {
            violations.push("height must be between 256 and 1024 and a multiple of 64".to_owned());
        }
        if !(-10..=10).contains(&self.priority) {
            violations.push("priority must be between -10 and 10".to_owned());
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations.join("; "))
        }
    }

    /// Converts into the stored form, resolving a null seed to a random one
    /// so the run is reproducible afterwards.
    #[must_use]
    pub fn into_params(self) -> (VideoParams, i32) {
        let seed = self
            .seed
            .unwrap_or_else(|| i64::from(rand::random::<u32>()));
        let params = VideoParams {
            prompt: self.prompt,
            num_frames: self.num_frames,
            num_inference_steps: self.num_inference_steps,
            guidance_scale: self.guidance_scale,
            fps: self.fps,
            width: self.width,
            height: self.height,
            seed,
            extra: Map::new(),
        };
        (params, self.priority)
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: Option<f64>,
    pub priority: i32,
    pub params: VideoParams,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_kind: Option<ErrorKind>,
    pub error_detail: Option<String>,
    pub retry_count: i32,
    pub download_url: Option<String>,
}

impl JobStatusResponse {
    #[must_use]
    pub fn from_job(job: Job, public_url: &str) -> Self {
        let download_url = (job.status == JobStatus::Completed)
            .then(|| format!("{public_url}/api/jobs/{}/download", job.id));
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            priority: job.priority,
            params: job.params.0,
            submitted_at: job.submitted_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error_kind: job.error_kind,
            error_detail: job.error_detail,
            retry_count: job.retry_count,
            download_url,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListJobsParams {
    /// 1-based page number.
    pub page: Option<i64>,
    /// Jobs per page, between 1 and 100.
    pub page_size: Option<i64>,
    pub status_filter: Option<JobStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct JobListResponse {
    pub jobs: Vec<JobStatusResponse>,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub total: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelJobResponse {
    pub status: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> serde_json::Value {
        serde_json::json!({ "prompt": "a cat walks" })
    }

    #[test]
    fn defaults_are_applied() {
        let request: SubmitJobRequest = serde_json::from_value(valid_request()).unwrap();
        assert_eq!(request.num_frames, 84);
        assert_eq!(request.num_inference_steps, 50);
        assert_eq!(request.guidance_scale, 7.5);
        assert_eq!(request.fps, 30);
        assert_eq!(request.width, 848);
        assert_eq!(request.height, 480);
        assert_eq!(request.seed, None);
        assert_eq!(request.priority, 0);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut body = valid_request();
        body["frames"] = serde_json::json!(10);
        assert!(serde_json::from_value::<SubmitJobRequest>(body).is_err());
    }

    #[test]
    fn num_frames_boundaries() {
        for (frames, ok) in [(0, false), (1, true), (163, true), (164, false)] {
            let mut body = valid_request();
            body["num_frames"] = serde_json::json!(frames);
            let request: SubmitJobRequest = serde_json::from_value(body).unwrap();
            assert_eq!(request.validate().is_ok(), ok, "num_frames={frames}");
        }
    }

    #[test]
    fn all_violations_are_reported_together() {
        let body = serde_json::json!({ "prompt": "", "width": 500 });
        let request: SubmitJobRequest = serde_json::from_value(body).unwrap();
        let message = request.validate().unwrap_err();
        assert!(message.contains("prompt length"));
        assert!(message.contains("width"));
    }

    #[test]
    fn width_must_be_multiple_of_64() {
        let mut body = valid_request();
        body["width"] = serde_json::json!(512);
        let request: SubmitJobRequest = serde_json::from_value(body).unwrap();
        assert!(request.validate().is_ok());

        let mut body = valid_request();
        body["width"] = serde_json::json!(500);
        let request: SubmitJobRequest = serde_json::from_value(body).unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn null_seed_is_resolved_and_recorded() {
        let request: SubmitJobRequest = serde_json::from_value(valid_request()).unwrap();
        let (params, _) = request.into_params();
        assert!(params.seed >= 0);

        let mut body = valid_request();
        body["seed"] = serde_json::json!(42);
        let request: SubmitJobRequest = serde_json::from_value(body).unwrap();
        let (params, _) = request.into_params();
        assert_eq!(params.seed, 42);
    }
}
