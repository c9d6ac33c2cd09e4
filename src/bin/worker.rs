use std::sync::Arc;

use futures_util::future::join_all;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use notifier::{config::AppConfig, db, default_handlers, state::AppState, Worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let concurrency = config.worker_concurrency.max(1);
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        concurrency,
        lease_secs = config.job_lease.as_secs(),
        "loaded notifier configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let poll_interval = config.worker_poll_interval;
    let state = Arc::new(AppState::with_pool(pool, config)?);

    let workers: Vec<Worker> = (0..concurrency)
        .map(|index| {
            Worker::new(
                format!("worker-{index}"),
                state.clone(),
                default_handlers(),
                poll_interval,
            )
        })
        .collect();

    tokio::select! {
        _ = join_all(workers.iter().map(Worker::run)) => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
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
