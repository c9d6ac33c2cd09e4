use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{error, info};
use uuid::Uuid;

use crate::{jobs::DailyReportKind, models::TenantId};

/// Operations-facing collaborators: business reports, failure alerts and the
/// daily report requests. Where these end up is decided by the implementation.
#[async_trait]
pub trait OpsNotifier: Send + Sync {
    async fn business_area_report(
        &self,
        tenant_id: TenantId,
        date: NaiveDate,
        appointment_count: usize,
    ) -> anyhow::Result<()>;

    async fn error_alert(
        &self,
        process: &str,
        error: &str,
        job_id: Option<Uuid>,
    ) -> anyhow::Result<()>;

    async fn daily_report(&self, report: DailyReportKind, date: NaiveDate) -> anyhow::Result<()>;
}

/// Writes every ops event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl OpsNotifier for TracingNotifier {
    async fn business_area_report(
        &self,
        tenant_id: TenantId,
        date: NaiveDate,
        appointment_count: usize,
    ) -> anyhow::Result<()> {
        info!(tenant_id, %date, appointment_count, "business area report");
        Ok(())
    }

    async fn error_alert(
        &self,
        process: &str,
        error: &str,
        job_id: Option<Uuid>,
    ) -> anyhow::Result<()> {
        match job_id {
            Some(job_id) => error!(%process, %job_id, %error, "pipeline error alert"),
            None => error!(%process, %error, "pipeline error alert"),
        }
        Ok(())
    }

    async fn daily_report(&self, report: DailyReportKind, date: NaiveDate) -> anyhow::Result<()> {
        info!(report = report.as_str(), %date, "daily report requested");
        Ok(())
    }
}
