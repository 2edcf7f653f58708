use crate::{AppSettings, RawSettings};
use color_eyre::eyre::Result;
use config::{Config, File};
use std::env;
use std::fs;
use std::path::Path;

pub fn load_settings_from_path(path: &Path, env_path: Option<&Path>) -> Result<AppSettings> {
    // Load from dotenv first so env overrides see the file's values.
    if let Some(env_path) = env_path {
        dotenv::from_path(env_path).ok();
    }

    let builder = Config::builder().add_source(File::from(path)).add_source(
        config::Environment::with_prefix("APP")
            .separator("__")
            .try_parsing(true),
    );

    let mut raw_settings = builder.build()?.try_deserialize::<RawSettings>()?;
    apply_env_overrides(&mut raw_settings);
    let settings: AppSettings = raw_settings.into();

    fs::create_dir_all(settings.generator.output_dir.join(".tmp"))
        .expect("Cannot create output folder");

    Ok(settings)
}

pub fn load_app_settings() -> Result<AppSettings> {
    let config_path = Path::new("config/settings.yaml").canonicalize()?;
    load_settings_from_path(&config_path, Some(Path::new(".env")))
}

/// Plain env names honored as overrides for deployment environments that do
/// not use the `APP__`-prefixed form.
fn apply_env_overrides(raw: &mut RawSettings) {
    if let Ok(url) = env::var("DATABASE_URL") {
        raw.secrets.database_url = url;
    }
    if let Ok(n) = env::var("MAX_CONCURRENT_JOBS")
        && let Ok(n) = n.parse()
    {
        raw.worker.max_concurrent_jobs = n;
    }
    if let Ok(dir) = env::var("OUTPUT_DIR") {
        raw.generator.output_dir = dir.into();
    }
    if let Ok(dir) = env::var("MODEL_CACHE_DIR") {
        raw.generator.model_cache_dir = dir.into();
    }
    if let Ok(host) = env::var("HOST") {
        raw.api.host = host;
    }
    if let Ok(port) = env::var("PORT")
        && let Ok(port) = port.parse()
    {
        raw.api.port = port;
    }
}
