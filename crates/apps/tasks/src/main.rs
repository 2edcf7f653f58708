mod task_runner;

use crate::task_runner::run_reconciler;
use app_state::load_app_settings;
use clap::Parser;
use color_eyre::Result;
use common_services::database::connect_and_migrate;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Run a single sweep and exit instead of looping.
    #[clap(long, default_value_t = false, action)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    color_eyre::install()?;

    let settings = load_app_settings()?;
    let pool = connect_and_migrate(&settings.secrets.database_url).await?;

    run_reconciler(pool, settings, Args::parse().once).await?;

    Ok(())
}
