use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    error::PipelineError,
    jobs::{enqueue_payload, EnqueueOptions, FailureDisposition, JobQueueError, NotificationJob},
    models::Job,
    state::AppState,
};

pub mod delivery;
pub mod notifications;
pub mod reports;

pub use delivery::DeliveryDispatcher;
pub use notifications::NotificationDispatcher;
pub use reports::ReportDispatcher;

#[derive(Debug)]
pub enum JobExecution {
    Success,
    /// Transient failure; the queue decides the delay from the attempt count.
    Retry { error: String },
    Failed { error: String },
}

impl From<PipelineError> for JobExecution {
    fn from(err: PipelineError) -> Self {
        if err.is_retryable() {
            JobExecution::Retry {
                error: err.to_string(),
            }
        } else {
            JobExecution::Failed {
                error: err.to_string(),
            }
        }
    }
}

impl From<Result<(), PipelineError>> for JobExecution {
    fn from(result: Result<(), PipelineError>) -> Self {
        match result {
            Ok(()) => JobExecution::Success,
            Err(err) => err.into(),
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn queue(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;
}

pub struct Worker {
    name: String,
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let map = handlers
            .into_iter()
            .map(|handler| (handler.queue(), handler))
            .collect();
        Self {
            name: name.into(),
            state,
            handlers: map,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!(worker = %self.name, "worker started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(worker = %self.name, error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Processes ready jobs until none is left. Returns how many were handled.
    pub async fn run_until_idle(&self) -> Result<usize, JobQueueError> {
        let mut processed = 0;
        while self.tick().await? {
            processed += 1;
        }
        Ok(processed)
    }

    pub async fn tick(&self) -> Result<bool, JobQueueError> {
        let queues: Vec<&str> = self.handlers.keys().copied().collect();
        if queues.is_empty() {
            return Ok(false);
        }

        let Some(job) = self.state.queue.reserve(&queues).await? else {
            return Ok(false);
        };

        let Some(handler) = self.handlers.get(job.queue.as_str()) else {
            error!(queue = %job.queue, "no handler registered for queue");
            self.state
                .queue
                .fail(&job, "no handler registered", false)
                .await?;
            return Ok(true);
        };

        match handler.handle(self.state.clone(), job.clone()).await {
            JobExecution::Success => {
                self.state.queue.complete(job.id).await?;
                info!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempt = job.attempts,
                    "job completed successfully"
                );
            }
            JobExecution::Retry { error } => {
                warn!(job_id = %job.id, job_type = %job.job_type, %error, "job attempt failed");
                let disposition = self.state.queue.fail(&job, &error, true).await?;
                self.after_failure(&job, &error, disposition).await?;
            }
            JobExecution::Failed { error } => {
                error!(job_id = %job.id, job_type = %job.job_type, %error, "job failed");
                let disposition = self.state.queue.fail(&job, &error, false).await?;
                self.after_failure(&job, &error, disposition).await?;
            }
        }
        Ok(true)
    }

    async fn after_failure(
        &self,
        job: &Job,
        error: &str,
        disposition: FailureDisposition,
    ) -> Result<(), JobQueueError> {
        match disposition {
            FailureDisposition::Rescheduled { delay, attempts } => {
                info!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempts,
                    delay_secs = delay.as_secs(),
                    "job rescheduled"
                );
                Ok(())
            }
            // An alert about a dead alert would loop forever.
            FailureDisposition::Dead if job.job_type == "error_alert" => {
                error!(job_id = %job.id, %error, "error alert job is dead");
                Ok(())
            }
            FailureDisposition::Dead => {
                error!(job_id = %job.id, job_type = %job.job_type, %error, "job is dead");
                let alert = NotificationJob::ErrorAlert {
                    process: format!("{}:{}", job.queue, job.job_type),
                    error: error.to_string(),
                    job_id: Some(job.id),
                };
                enqueue_payload(self.state.queue.as_ref(), &alert, EnqueueOptions::default())
                    .await?;
                Ok(())
            }
        }
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![
        Arc::new(NotificationDispatcher::new()),
        Arc::new(DeliveryDispatcher::new()),
        Arc::new(ReportDispatcher::new()),
    ]
}
