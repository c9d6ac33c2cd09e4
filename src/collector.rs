use std::{collections::BTreeMap, fmt, sync::Arc};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{error, info};

use crate::{
    config::LeadTime,
    error::PipelineError,
    jobs::{enqueue_payload, DailyReportKind, EnqueueOptions, NotificationJob, ReportJob},
    models::{AppointmentStatus, TenantId},
    state::AppState,
    store::AppointmentFilter,
};

pub const SAME_DAY_PRIORITY: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorPass {
    /// Appointments happening today that were never notified.
    Daily,
    /// Appointments starting roughly `hours` from now.
    LeadTime(LeadTime),
    /// Yesterday's confirmation, cancellation and no-response reports.
    DailyReports,
}

impl fmt::Display for CollectorPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => f.write_str("daily-collector"),
            Self::LeadTime(lead) => write!(f, "lead-time-collector-{}h", lead.hours),
            Self::DailyReports => f.write_str("daily-reports"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub matched: usize,
    pub enqueued: usize,
    pub deduplicated: usize,
    /// The pass failed and an error alert was raised instead.
    pub alerted: bool,
}

impl PassSummary {
    fn count(&mut self, deduplicated: bool) {
        if deduplicated {
            self.deduplicated += 1;
        } else {
            self.enqueued += 1;
        }
    }
}

pub struct Collector {
    state: Arc<AppState>,
}

impl Collector {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Runs one pass. Failures never propagate: they are turned into an
    /// `error_alert` job so the next scheduled run starts clean.
    pub async fn run_pass(&self, pass: CollectorPass, now: DateTime<Utc>) -> PassSummary {
        let result = match pass {
            CollectorPass::Daily => self.collect_same_day(now).await,
            CollectorPass::LeadTime(lead) => self.collect_lead_time(lead, now).await,
            CollectorPass::DailyReports => self.request_daily_reports(now).await,
        };

        match result {
            Ok(summary) => {
                info!(
                    pass = %pass,
                    matched = summary.matched,
                    enqueued = summary.enqueued,
                    deduplicated = summary.deduplicated,
                    "collector pass finished"
                );
                summary
            }
            Err(err) => {
                error!(pass = %pass, error = %err, "collector pass failed");
                let alert = NotificationJob::error_alert(pass.to_string(), &err);
                if let Err(alert_err) =
                    enqueue_payload(self.state.queue.as_ref(), &alert, EnqueueOptions::default())
                        .await
                {
                    error!(pass = %pass, error = %alert_err, "failed to raise error alert");
                }
                PassSummary {
                    alerted: true,
                    ..PassSummary::default()
                }
            }
        }
    }

    fn local_today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.state.config.timezone).date_naive()
    }

    fn options(&self, priority: i32) -> EnqueueOptions {
        EnqueueOptions::default()
            .priority(priority)
            .max_attempts(self.state.config.notification_max_attempts)
    }

    async fn collect_same_day(&self, now: DateTime<Utc>) -> Result<PassSummary, PipelineError> {
        let today = self.local_today(now);
        let appointments = self
            .state
            .store
            .find_appointments(AppointmentFilter {
                date: Some(today),
                notification_sent: Some(false),
                ..AppointmentFilter::default().with_status(AppointmentStatus::Scheduled)
            })
            .await?;

        let mut summary = PassSummary {
            matched: appointments.len(),
            ..PassSummary::default()
        };
        let mut per_tenant: BTreeMap<TenantId, usize> = BTreeMap::new();

        for appointment in &appointments {
            let handle = enqueue_payload(
                self.state.queue.as_ref(),
                &NotificationJob::Appointment {
                    tenant_id: appointment.tenant_id,
                    appointment_id: appointment.id,
                },
                self.options(SAME_DAY_PRIORITY)
                    .dedupe_key(format!("appointment:{}:{today}", appointment.id)),
            )
            .await?;
            summary.count(handle.deduplicated);
            *per_tenant.entry(appointment.tenant_id).or_default() += 1;
        }

        for (tenant_id, appointment_count) in per_tenant {
            enqueue_payload(
                self.state.queue.as_ref(),
                &NotificationJob::BusinessAreaReport {
                    tenant_id,
                    date: today,
                    appointment_count,
                },
                self.options(SAME_DAY_PRIORITY)
                    .dedupe_key(format!("business_area_report:{tenant_id}:{today}")),
            )
            .await?;
        }

        Ok(summary)
    }

    async fn collect_lead_time(
        &self,
        lead: LeadTime,
        now: DateTime<Utc>,
    ) -> Result<PassSummary, PipelineError> {
        let local_now = now.with_timezone(&self.state.config.timezone).naive_local();
        let target = local_now + Duration::hours(i64::from(lead.hours));
        let tolerance = self.state.config.lead_time_tolerance;
        let (window_start, window_end) = (target - tolerance, target + tolerance);

        let candidates = self
            .state
            .store
            .find_appointments(AppointmentFilter {
                date_range: Some((window_start.date(), window_end.date())),
                notification_sent: Some(false),
                ..AppointmentFilter::default().with_status(AppointmentStatus::Scheduled)
            })
            .await?;

        let mut summary = PassSummary::default();
        for appointment in candidates.iter().filter(|appointment| {
            let starts_at = appointment.starts_at();
            starts_at >= window_start && starts_at <= window_end
        }) {
            summary.matched += 1;
            let handle = enqueue_payload(
                self.state.queue.as_ref(),
                &NotificationJob::AppointmentLeadTime {
                    tenant_id: appointment.tenant_id,
                    appointment_id: appointment.id,
                    lead_hours: lead.hours,
                },
                self.options(lead.priority)
                    .dedupe_key(format!("appointment_nh:{}", appointment.id)),
            )
            .await?;
            summary.count(handle.deduplicated);
        }

        Ok(summary)
    }

    async fn request_daily_reports(
        &self,
        now: DateTime<Utc>,
    ) -> Result<PassSummary, PipelineError> {
        let yesterday = self.local_today(now) - Duration::days(1);
        let mut summary = PassSummary {
            matched: DailyReportKind::ALL.len(),
            ..PassSummary::default()
        };
        for report in DailyReportKind::ALL {
            let handle = enqueue_payload(
                self.state.queue.as_ref(),
                &ReportJob::DailyReport {
                    report,
                    date: yesterday,
                },
                EnqueueOptions::default()
                    .max_attempts(self.state.config.notification_max_attempts)
                    .dedupe_key(format!("daily_report:{}:{yesterday}", report.as_str())),
            )
            .await?;
            summary.count(handle.deduplicated);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_names_identify_the_process() {
        assert_eq!(CollectorPass::Daily.to_string(), "daily-collector");
        assert_eq!(
            CollectorPass::LeadTime(LeadTime {
                hours: 40,
                priority: 1
            })
            .to_string(),
            "lead-time-collector-40h"
        );
        assert_eq!(CollectorPass::DailyReports.to_string(), "daily-reports");
    }
}
