use std::{env, sync::Arc};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use uuid::Uuid;

use notifier::{
    config::{AppConfig, LeadTime},
    db,
    state::AppState,
    Collector, CollectorPass,
};

const USAGE: &str = "Usage: maintenance <command>\n\
    \x20 run-pass daily|reports|lead <hours>\n\
    \x20 list-dead [limit]\n\
    \x20 requeue <job-id>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt().with_target(false).compact().init();

    let args: Vec<String> = env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["run-pass", pass @ ..] => run_pass(pass).await?,
        ["list-dead"] => list_dead(50).await?,
        ["list-dead", limit] => list_dead(limit.parse().context("limit must be a number")?).await?,
        ["requeue", id] => requeue(id.parse().context("job id must be a UUID")?).await?,
        [cmd, ..] => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        [] => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<Arc<AppState>> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        "loaded notifier configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    Ok(Arc::new(AppState::with_pool(pool, config)?))
}

async fn run_pass(args: &[&str]) -> Result<()> {
    let state = connect()?;
    let pass = match args {
        ["daily"] => CollectorPass::Daily,
        ["reports"] => CollectorPass::DailyReports,
        ["lead", hours] => {
            let hours: u32 = hours.parse().context("lead hours must be a number")?;
            let lead = state
                .config
                .lead_times
                .iter()
                .copied()
                .find(|lead| lead.hours == hours)
                .unwrap_or(LeadTime { hours, priority: 1 });
            CollectorPass::LeadTime(lead)
        }
        _ => bail!("unknown pass\n{USAGE}"),
    };

    let summary = Collector::new(state).run_pass(pass, Utc::now()).await;
    println!(
        "{pass}: matched {}, enqueued {}, already queued {}{}",
        summary.matched,
        summary.enqueued,
        summary.deduplicated,
        if summary.alerted { " (failed, alert raised)" } else { "" }
    );
    Ok(())
}

async fn list_dead(limit: i64) -> Result<()> {
    let state = connect()?;
    let jobs = state.queue.dead_jobs(limit).await?;
    if jobs.is_empty() {
        println!("No dead jobs.");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{} {}/{} attempts={} updated={} error={}",
            job.id,
            job.queue,
            job.job_type,
            job.attempts,
            job.updated_at,
            job.last_error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn requeue(id: Uuid) -> Result<()> {
    let state = connect()?;
    if state.queue.requeue(id).await? {
        println!("Job {id} requeued.");
    } else {
        println!("Job {id} is not dead or does not exist.");
    }
    Ok(())
}
