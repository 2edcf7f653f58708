use app_state::AppSettings;
use color_eyre::Result;
use common_services::reconcile::run_sweep;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error, info};

/// The reconciler loop: repairs state the replicas could not clean up
/// themselves. Each sweep is idempotent, so running this on several machines
/// at once only costs redundant queries.
pub async fn run_reconciler(pool: PgPool, settings: AppSettings, once: bool) -> Result<()> {
    let sweep_interval = Duration::from_secs(settings.reconciler.sweep_interval_seconds);
    info!("🧹 Reconciler starting, sweeping every {sweep_interval:?}.");

    let mut interval = tokio::time::interval(sweep_interval);
    loop {
        interval.tick().await;

        match run_sweep(&pool, &settings).await {
            Ok(report) => {
                if !report.recovered.is_empty()
                    || report.lost > 0
                    || report.stale_cancels > 0
                    || report.purged > 0
                {
                    info!(
                        "Sweep: {} recovered, {} lost, {} stale cancels, {} purged.",
                        report.recovered.len(),
                        report.lost,
                        report.stale_cancels,
                        report.purged
                    );
                }
            }
            Err(e) => error!("Sweep failed: {e}"),
        }

        if once {
            return Ok(());
        }
    }
}
