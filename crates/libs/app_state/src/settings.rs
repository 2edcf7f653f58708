use crate::{
    ApiSettings, LoggingSettings, RawGeneratorSettings, RawSettings, ReconcilerSettings,
    SecretSettings, WorkerSettings,
};
use serde::Deserialize;
use std::path::{absolute, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppSettings {
    pub api: ApiSettings,
    pub worker: WorkerSettings,
    pub generator: GeneratorSettings,
    pub reconciler: ReconcilerSettings,
    pub logging: LoggingSettings,
    pub secrets: SecretSettings,
}

/// Generator settings with resolved absolute paths.
#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorSettings {
    pub command: String,
    pub model_cache_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl From<RawSettings> for AppSettings {
    fn from(raw: RawSettings) -> Self {
        let output_dir = absolute(&raw.generator.output_dir).expect("Invalid output_dir");
        let model_cache_dir =
            absolute(&raw.generator.model_cache_dir).expect("Invalid model_cache_dir");
        let generator = GeneratorSettings {
            command: raw.generator.command,
            model_cache_dir,
            output_dir,
        };

        Self {
            api: raw.api,
            worker: raw.worker,
            generator,
            reconciler: raw.reconciler,
            logging: raw.logging,
            secrets: raw.secrets,
        }
    }
}

impl WorkerSettings {
    #[must_use]
    pub const fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }

    /// Leases are renewed at a third of their duration so a single missed
    /// heartbeat does not orphan the job.
    #[must_use]
    pub const fn lease_renewal(&self) -> Duration {
        let third = self.lease_seconds / 3;
        Duration::from_secs(if third == 0 { 1 } else { third })
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    #[must_use]
    pub const fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_seconds)
    }

    #[must_use]
    pub const fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_seconds)
    }

    #[must_use]
    pub const fn store_retry(&self) -> Duration {
        Duration::from_secs(self.store_retry_seconds)
    }

    #[must_use]
    pub const fn replica_heartbeat(&self) -> Duration {
        Duration::from_secs(self.replica_heartbeat_seconds)
    }
}

impl GeneratorSettings {
    /// Final artifact location for a completed job.
    #[must_use]
    pub fn artifact_path(&self, job_id: &str) -> PathBuf {
        self.output_dir.join(format!("{job_id}.mp4"))
    }

    /// Scratch location the generator writes to before the atomic rename.
    #[must_use]
    pub fn scratch_path(&self, job_id: &str) -> PathBuf {
        self.output_dir.join(".tmp").join(format!("{job_id}.mp4"))
    }
}
