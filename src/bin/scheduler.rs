use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use notifier::{config::AppConfig, db, state::AppState, Collector, Scheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "scheduler",
        database_url = %config.redacted_database_url(),
        timezone = %config.timezone,
        daily_cron = %config.daily_cron,
        lead_time_cron = %config.lead_time_cron,
        lead_hours = ?config.lead_times.iter().map(|lead| lead.hours).collect::<Vec<_>>(),
        "loaded notifier configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let state = Arc::new(AppState::with_pool(pool, config)?);
    let scheduler = Scheduler::from_config(&state.config, Arc::new(Collector::new(state.clone())))?;

    tokio::select! {
        result = scheduler.run() => result?,
        _ = signal::ctrl_c() => {
            tracing::info!("scheduler received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
