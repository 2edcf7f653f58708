use app_state::{load_settings_from_path, AppSettings};
use color_eyre::eyre::{eyre, Result};
use common_services::database::{connect_pool, MIGRATOR};
use common_services::utils::nice_id;
use reqwest::Client;
use sqlx::PgPool;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A stub generator that speaks the real protocol: it reads the request line,
/// reports progress, writes the artifact, and finishes with a success line.
/// A prompt containing "slow" makes it checkpoint many times, which gives
/// cancellation and crash tests something to interrupt.
const STUB_GENERATOR: &str = r#"#!/bin/sh
read request
out=$(printf '%s' "$request" | sed -n 's/.*"output_path":"\([^"]*\)".*/\1/p')
case "$request" in
*slow*)
    i=1
    while [ $i -le 40 ]; do
        printf '{"progress": 0.%02d}\n' $((i * 2))
        sleep 0.1
        i=$((i + 1))
    done
    ;;
*)
    echo '{"progress": 0.25}'
    echo '{"progress": 0.75}'
    ;;
esac
printf 'fake video bytes' > "$out"
printf '{"ok": true, "path": "%s"}\n' "$out"
"#;

/// The main context for the integration tests: a dedicated database, a stub
/// generator, and the api + worker running as background tasks.
#[allow(dead_code)]
pub struct TestContext {
    pub pool: PgPool,
    pub settings: AppSettings,
    pub http_client: Client,
    // Private fields for robust cleanup on Drop
    db_name: String,
    management_pool: PgPool,
    output_dir: TempDir,
    api_handle: JoinHandle<()>,
    worker_handle: Option<JoinHandle<()>>,
}

impl TestContext {
    /// Sets up the entire test environment, including a dedicated database
    /// and background services.
    pub async fn new() -> Result<Self> {
        info!("Setting up test environment...");

        let settings_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("assets/settings.yaml")
            .canonicalize()?;
        let base_settings = load_settings_from_path(&settings_path, None)?;

        // 1. Set up the dedicated test database
        let db_name = format!("videogen_test_{}", nice_id(8).to_lowercase());
        let (pool, management_pool) =
            create_test_database(&base_settings.secrets.database_url, &db_name).await?;

        // 2. Generate the final settings for this test run
        let (settings, output_dir) = create_test_settings(&db_name, &base_settings)?;

        // 3. Spawn application components as background tasks
        let api_handle = Self::spawn_api(&pool, &settings);
        let worker_handle = Self::spawn_worker(&pool, &settings);

        // 4. Wait for the API to be ready to accept traffic
        let http_client = Client::new();
        Self::wait_for_healthy_api(&settings, &http_client).await?;

        info!("Test environment is ready.");
        Ok(Self {
            pool,
            settings,
            http_client,
            db_name,
            management_pool,
            output_dir,
            api_handle,
            worker_handle: Some(worker_handle),
        })
    }

    pub fn spawn_api(pool: &PgPool, settings: &AppSettings) -> JoinHandle<()> {
        let api_pool = pool.clone();
        let api_settings = settings.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(api_pool, api_settings).await {
                error!("API server failed: {}", e);
            }
        })
    }

    pub fn spawn_worker(pool: &PgPool, settings: &AppSettings) -> JoinHandle<()> {
        let worker_pool = pool.clone();
        let worker_settings = settings.clone();
        tokio::spawn(async move {
            if let Err(e) = worker::worker::create_worker(worker_pool, worker_settings, false).await
            {
                error!("Worker failed: {}", e);
            }
        })
    }

    /// Aborts the running worker, simulating a replica crash. The executor
    /// task dies with it and the generator child is killed on drop.
    pub fn kill_worker(&mut self) {
        if let Some(handle) = self.worker_handle.take() {
            handle.abort();
        }
    }

    /// Starts a fresh worker replica, e.g. after `kill_worker`.
    pub fn restart_worker(&mut self) {
        self.worker_handle = Some(Self::spawn_worker(&self.pool, &self.settings));
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.settings.api.public_url)
    }

    /// Polls the `/health` endpoint until it receives a successful response
    /// or times out.
    async fn wait_for_healthy_api(settings: &AppSettings, http_client: &Client) -> Result<()> {
        for attempt in 1..=20 {
            info!("Health check attempt {}...", attempt);
            let health_url = format!("{}/health", &settings.api.public_url);
            match http_client.get(&health_url).send().await {
                Ok(response) if response.status().is_success() => {
                    info!("API is healthy!");
                    return Ok(());
                }
                Ok(response) => {
                    warn!(
                        "API health check returned non-success status: {}",
                        response.status()
                    );
                }
                Err(e) => {
                    warn!("API health check failed: {:?}. Retrying...", e);
                }
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Err(eyre!(
            "API did not become healthy within the timeout period."
        ))
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.api_handle.abort();
        if let Some(handle) = self.worker_handle.take() {
            handle.abort();
        }

        let db_name = self.db_name.clone();
        let pool = self.management_pool.clone();
        tokio::spawn(async move {
            info!("Dropping test database: {}", db_name);
            let _ = sqlx::query(&format!("DROP DATABASE \"{db_name}\" WITH (FORCE)"))
                .execute(&pool)
                .await;
        });

        info!("Teardown complete.");
    }
}

async fn create_test_database(base_url: &str, db_name: &str) -> Result<(PgPool, PgPool)> {
    let management_pool = connect_pool(base_url).await?;
    sqlx::query(&format!("CREATE DATABASE \"{db_name}\""))
        .execute(&management_pool)
        .await?;

    let test_url = swap_database(base_url, db_name)?;
    let pool = connect_pool(&test_url).await?;
    MIGRATOR.run(&pool).await?;

    Ok((pool, management_pool))
}

/// Binds an ephemeral port, a fresh output directory, and the stub generator
/// into a copy of the base settings.
fn create_test_settings(db_name: &str, base: &AppSettings) -> Result<(AppSettings, TempDir)> {
    let output_dir = TempDir::new()?;

    let stub_path = output_dir.path().join("stub_generator.sh");
    std::fs::write(&stub_path, STUB_GENERATOR)?;

    let port = free_port()?;
    let mut settings = base.clone();
    settings.secrets.database_url = swap_database(&base.secrets.database_url, db_name)?;
    settings.api.port = port;
    settings.api.public_url = format!("http://127.0.0.1:{port}");
    settings.generator.command = format!("sh {}", stub_path.display());
    settings.generator.output_dir = output_dir.path().to_path_buf();
    std::fs::create_dir_all(output_dir.path().join(".tmp"))?;

    Ok((settings, output_dir))
}

fn swap_database(url: &str, db_name: &str) -> Result<String> {
    let split = url
        .rfind('/')
        .ok_or_else(|| eyre!("database url has no path segment: {url}"))?;
    Ok(format!("{}/{}", &url[..split], db_name))
}

fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
