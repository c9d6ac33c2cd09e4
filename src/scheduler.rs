use std::{str::FromStr, sync::Arc};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    collector::{Collector, CollectorPass},
    config::AppConfig,
};

struct ScheduleEntry {
    name: &'static str,
    schedule: Schedule,
    passes: Vec<CollectorPass>,
}

/// Fires collector passes on cron schedules evaluated in the configured zone.
pub struct Scheduler {
    collector: Arc<Collector>,
    timezone: Tz,
    entries: Vec<ScheduleEntry>,
}

pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression)
        .with_context(|| format!("invalid cron expression '{expression}'"))
}

pub fn next_occurrence(schedule: &Schedule, timezone: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&timezone))
        .next()
        .map(|next| next.with_timezone(&Utc))
}

impl Scheduler {
    pub fn from_config(config: &AppConfig, collector: Arc<Collector>) -> Result<Self> {
        let lead_passes = config
            .lead_times
            .iter()
            .copied()
            .map(CollectorPass::LeadTime)
            .collect();
        let entries = vec![
            ScheduleEntry {
                name: "daily",
                schedule: parse_schedule(&config.daily_cron)?,
                passes: vec![CollectorPass::Daily],
            },
            ScheduleEntry {
                name: "lead-time",
                schedule: parse_schedule(&config.lead_time_cron)?,
                passes: lead_passes,
            },
            ScheduleEntry {
                name: "daily-reports",
                schedule: parse_schedule(&config.daily_reports_cron)?,
                passes: vec![CollectorPass::DailyReports],
            },
        ];
        Ok(Self {
            collector,
            timezone: config.timezone,
            entries,
        })
    }

    /// The earliest upcoming tick after `after` and every pass due at it.
    pub fn next_tick(&self, after: DateTime<Utc>) -> Option<(DateTime<Utc>, Vec<CollectorPass>)> {
        let upcoming: Vec<(DateTime<Utc>, &ScheduleEntry)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                next_occurrence(&entry.schedule, self.timezone, after).map(|at| (at, entry))
            })
            .collect();
        let at = upcoming.iter().map(|(at, _)| *at).min()?;
        let passes = upcoming
            .into_iter()
            .filter(|(when, _)| *when == at)
            .flat_map(|(_, entry)| entry.passes.iter().copied())
            .collect();
        Some((at, passes))
    }

    pub async fn run(self) -> Result<()> {
        info!(
            timezone = %self.timezone,
            schedules = ?self.entries.iter().map(|entry| entry.name).collect::<Vec<_>>(),
            "scheduler started"
        );
        let mut cursor = Utc::now();
        loop {
            let (at, passes) = self
                .next_tick(cursor)
                .ok_or_else(|| anyhow!("no schedule has a future occurrence"))?;
            let wait = (at - Utc::now()).to_std().unwrap_or_default();
            sleep(wait).await;
            cursor = at;

            for pass in passes {
                let collector = self.collector.clone();
                // Passes run detached from the tick loop.
                tokio::spawn(async move {
                    let summary = collector.run_pass(pass, Utc::now()).await;
                    if summary.alerted {
                        warn!(pass = %pass, "scheduled pass raised an error alert");
                    }
                });
            }
        }
    }
}
