use std::{env, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use chrono_tz::Tz;
use url::Url;

use crate::channel::http::DEFAULT_API_BASE_URL;
use crate::db::DEFAULT_MAX_POOL_SIZE;
use crate::retry::DEFAULT_MAX_ATTEMPTS;

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Sao_Paulo;
pub const DEFAULT_DAILY_CRON: &str = "1 0 0 * * *";
pub const DEFAULT_LEAD_TIME_CRON: &str = "0 0 */2 * * *";
pub const DEFAULT_DAILY_REPORTS_CRON: &str = "0 0 0 * * *";
pub const DEFAULT_MAX_REPROMPTS: i64 = 3;
pub const WEBHOOK_PATH: &str = "/api/whatsapp/webhook";

/// A reminder pass running `hours` ahead of the appointment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeadTime {
    pub hours: u32,
    /// Queue priority; shorter leads are more urgent.
    pub priority: i32,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    /// Externally reachable origin of this service; the provider posts delivery
    /// statuses and replies to the webhook under it.
    pub public_base_url: String,
    pub channel_api_base_url: String,
    pub timezone: Tz,
    pub daily_cron: String,
    pub lead_time_cron: String,
    pub daily_reports_cron: String,
    pub lead_times: Vec<LeadTime>,
    pub lead_time_tolerance: chrono::Duration,
    pub notification_max_attempts: i32,
    pub max_reprompts: i64,
    pub worker_concurrency: usize,
    pub worker_poll_interval: Duration,
    pub job_lease: Duration,
    pub default_country_code: String,
}

impl AppConfig {
    /// Configuration with every optional setting at its default.
    pub fn new(database_url: impl Into<String>, public_base_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            database_max_pool_size: DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 3000,
            public_base_url: normalize_base_url(&public_base_url.into()),
            channel_api_base_url: DEFAULT_API_BASE_URL.to_string(),
            timezone: DEFAULT_TIMEZONE,
            daily_cron: DEFAULT_DAILY_CRON.to_string(),
            lead_time_cron: DEFAULT_LEAD_TIME_CRON.to_string(),
            daily_reports_cron: DEFAULT_DAILY_REPORTS_CRON.to_string(),
            lead_times: lead_times_from_hours(&[48, 40]),
            lead_time_tolerance: chrono::Duration::hours(2),
            notification_max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_reprompts: DEFAULT_MAX_REPROMPTS,
            worker_concurrency: 4,
            worker_poll_interval: Duration::from_millis(2000),
            job_lease: Duration::from_secs(600),
            default_country_code: "55".to_string(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let public_base_url = env::var("PUBLIC_BASE_URL").context("PUBLIC_BASE_URL must be set")?;
        Url::parse(public_base_url.trim())
            .with_context(|| format!("PUBLIC_BASE_URL `{public_base_url}` is not a valid URL"))?;
        let mut config = Self::new(database_url, public_base_url);

        config.database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        if let Ok(host) = env::var("SERVER_HOST") {
            config.server_host = host;
        }
        config.server_port = parse_var("SERVER_PORT", config.server_port)?;
        if let Ok(base) = env::var("CHANNEL_API_BASE_URL") {
            config.channel_api_base_url = base;
        }
        if let Ok(tz) = env::var("SCHEDULER_TIMEZONE") {
            config.timezone = tz
                .parse()
                .map_err(|err| anyhow::anyhow!("SCHEDULER_TIMEZONE is not a valid zone: {err}"))?;
        }
        if let Ok(cron) = env::var("DAILY_CRON") {
            config.daily_cron = cron;
        }
        if let Ok(cron) = env::var("LEAD_TIME_CRON") {
            config.lead_time_cron = cron;
        }
        if let Ok(cron) = env::var("DAILY_REPORTS_CRON") {
            config.daily_reports_cron = cron;
        }
        if let Ok(hours) = env::var("LEAD_TIME_HOURS") {
            config.lead_times = parse_lead_times(&hours)?;
        }
        let tolerance_hours: i64 = parse_var("LEAD_TIME_TOLERANCE_HOURS", 2)?;
        config.lead_time_tolerance = chrono::Duration::hours(tolerance_hours);
        config.notification_max_attempts =
            parse_var("NOTIFICATION_MAX_ATTEMPTS", config.notification_max_attempts)?;
        config.max_reprompts = parse_var("MAX_REPROMPTS", config.max_reprompts)?;
        config.worker_concurrency = parse_var("WORKER_CONCURRENCY", config.worker_concurrency)?;
        config.worker_poll_interval =
            Duration::from_millis(parse_var("WORKER_POLL_INTERVAL_MS", 2000u64)?);
        config.job_lease = Duration::from_secs(parse_var("JOB_LEASE_SECONDS", 600u64)?);
        if let Ok(code) = env::var("DEFAULT_COUNTRY_CODE") {
            config.default_country_code = code;
        }

        Ok(config)
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }

    /// Address the provider posts delivery statuses and replies to.
    pub fn status_callback_url(&self) -> String {
        format!("{}{WEBHOOK_PATH}", self.public_base_url)
    }
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value `{value}`")),
        Err(_) => Ok(default),
    }
}

/// Shorter leads run closer to the appointment and get the lower (more urgent)
/// priority, starting at 1. Priority 0 is kept for same-day jobs.
pub fn lead_times_from_hours(hours: &[u32]) -> Vec<LeadTime> {
    let mut sorted = hours.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
        .into_iter()
        .enumerate()
        .map(|(rank, hours)| LeadTime {
            hours,
            priority: i32::try_from(rank).unwrap_or(i32::MAX - 1) + 1,
        })
        .collect()
}

fn parse_lead_times(raw: &str) -> Result<Vec<LeadTime>> {
    let hours = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>()
                .with_context(|| format!("LEAD_TIME_HOURS entry `{part}` is not a number"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(lead_times_from_hours(&hours))
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(Some("*****"));
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
