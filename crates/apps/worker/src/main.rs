use app_state::load_app_settings;
use clap::Parser;
use color_eyre::Result;
use common_services::database::connect_and_migrate;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use worker::worker::create_worker;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Exit once the queue is drained instead of polling forever.
    #[clap(long, default_value_t = false, action)]
    stop_on_idle: bool,
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

    create_worker(pool, settings, Args::parse().stop_on_idle).await?;

    Ok(())
}
