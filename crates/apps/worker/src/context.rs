use crate::gpu::GpuRegistry;
use app_state::AppSettings;
use sqlx::PgPool;
use video_generator::VideoGenerator;

pub struct WorkerContext {
    pub replica_id: String,
    pub pool: PgPool,
    pub settings: AppSettings,
    pub gpu: GpuRegistry,
    pub generator: VideoGenerator,
}

impl WorkerContext {
    #[must_use]
    pub fn new(pool: PgPool, settings: AppSettings, replica_id: String) -> Self {
        let gpu = GpuRegistry::new(settings.worker.gpu_slots);
        let generator = VideoGenerator::from_settings(&settings.generator);
        Self {
            replica_id,
            pool,
            settings,
            gpu,
            generator,
        }
    }
}
