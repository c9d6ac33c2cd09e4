use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use super::{JobExecution, JobHandler};
use crate::{
    jobs::{QueuePayload, ReportJob, QUEUE_REPORTS},
    models::Job,
    state::AppState,
};

pub struct ReportDispatcher;

impl ReportDispatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ReportDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for ReportDispatcher {
    fn queue(&self) -> &'static str {
        QUEUE_REPORTS
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload = match ReportJob::decode(&job) {
            Ok(payload) => payload,
            Err(err) => {
                error!(job_id = %job.id, error = %err, "invalid report payload");
                return JobExecution::Failed {
                    error: format!("invalid report payload: {err}"),
                };
            }
        };

        match payload {
            ReportJob::DailyReport { report, date } => {
                match state.ops.daily_report(report, date).await {
                    Ok(()) => JobExecution::Success,
                    Err(err) => JobExecution::Retry {
                        error: format!("{} report for {date} failed: {err}", report.as_str()),
                    },
                }
            }
        }
    }
}
