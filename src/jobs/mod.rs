use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::Job;
use crate::retry::{RetryDecision, RetryPolicy, DEFAULT_MAX_ATTEMPTS};

pub mod memory;
pub mod payloads;
pub mod pg;

pub use memory::MemoryJobQueue;
pub use payloads::{
    enqueue_payload, DailyReportKind, DeliveryJob, NotificationJob, QueuePayload, ReportJob,
};
pub use pg::PgJobQueue;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_DEAD: &str = "dead";

pub const QUEUE_NOTIFICATIONS: &str = "notifications";
pub const QUEUE_DELIVERY: &str = "delivery";
pub const QUEUE_REPORTS: &str = "reports";

/// How long a reserved job stays invisible before another consumer may take it.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub delay: Option<Duration>,
    /// Lower runs first.
    pub priority: i32,
    pub max_attempts: i32,
    /// At most one live (non-dead) job may carry a given key.
    pub dedupe_key: Option<String>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            delay: None,
            priority: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            dedupe_key: None,
        }
    }
}

impl EnqueueOptions {
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub id: Uuid,
    /// The job already existed under the same dedupe key and was not inserted again.
    pub deduplicated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    Rescheduled { delay: Duration, attempts: i32 },
    Dead,
}

/// Durable at-least-once queue. A reserved job that is neither completed nor
/// failed before its lease runs out becomes visible again.
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    async fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> JobQueueResult<JobHandle>;

    /// Takes the most urgent ready job from any of `queues`, counting the attempt.
    async fn reserve(&self, queues: &[&str]) -> JobQueueResult<Option<Job>>;

    async fn complete(&self, job_id: Uuid) -> JobQueueResult<()>;

    /// Records a failed attempt. Retryable failures are rescheduled with backoff
    /// until the job's attempt budget is spent, everything else goes dead.
    async fn fail(
        &self,
        job: &Job,
        error: &str,
        retryable: bool,
    ) -> JobQueueResult<FailureDisposition>;

    async fn dead_jobs(&self, limit: i64) -> JobQueueResult<Vec<Job>>;

    /// Puts a dead job back in line with a fresh attempt budget.
    async fn requeue(&self, job_id: Uuid) -> JobQueueResult<bool>;
}

pub(crate) fn failure_disposition(
    policy: &RetryPolicy,
    job: &Job,
    retryable: bool,
) -> FailureDisposition {
    if !retryable {
        return FailureDisposition::Dead;
    }
    match policy.decide(job.attempts, job.max_attempts) {
        RetryDecision::RetryAfter(delay) => FailureDisposition::Rescheduled {
            delay,
            attempts: job.attempts,
        },
        RetryDecision::GiveUp => FailureDisposition::Dead,
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}
