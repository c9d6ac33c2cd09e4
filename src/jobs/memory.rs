use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    failure_disposition, to_chrono, EnqueueOptions, FailureDisposition, JobHandle, JobQueue,
    JobQueueResult, DEFAULT_LEASE, STATUS_DEAD, STATUS_PROCESSING, STATUS_QUEUED,
    STATUS_SUCCEEDED,
};
use crate::models::Job;
use crate::retry::RetryPolicy;

struct QueueState {
    jobs: Vec<Job>,
    clock_offset: chrono::Duration,
}

impl QueueState {
    fn new() -> Self {
        Self {
            jobs: Vec::new(),
            clock_offset: chrono::Duration::zero(),
        }
    }

    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc() + self.clock_offset
    }

    fn job_mut(&mut self, id: Uuid) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }
}

/// Queue kept in process memory with a clock that tests can move forward.
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    policy: RetryPolicy,
    lease: Duration,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::new()),
            policy: RetryPolicy::default(),
            lease: DEFAULT_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub async fn advance_clock(&self, by: Duration) {
        let mut state = self.state.lock().await;
        state.clock_offset = state.clock_offset + to_chrono(by);
    }

    pub async fn jobs(&self) -> Vec<Job> {
        self.state.lock().await.jobs.clone()
    }

    pub async fn jobs_in(&self, queue: &str) -> Vec<Job> {
        self.state
            .lock()
            .await
            .jobs
            .iter()
            .filter(|job| job.queue == queue)
            .cloned()
            .collect()
    }

    pub async fn job(&self, id: Uuid) -> Option<Job> {
        self.state
            .lock()
            .await
            .jobs
            .iter()
            .find(|job| job.id == id)
            .cloned()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> JobQueueResult<JobHandle> {
        let mut state = self.state.lock().await;

        if let Some(key) = options.dedupe_key.as_deref() {
            if let Some(existing) = state
                .jobs
                .iter()
                .find(|job| job.status != STATUS_DEAD && job.dedupe_key.as_deref() == Some(key))
            {
                return Ok(JobHandle {
                    id: existing.id,
                    deduplicated: true,
                });
            }
        }

        let now = state.now();
        let job = Job {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            job_type: job_type.to_string(),
            payload,
            status: STATUS_QUEUED.to_string(),
            priority: options.priority,
            attempts: 0,
            max_attempts: options.max_attempts,
            run_after: options.delay.map_or(now, |delay| now + to_chrono(delay)),
            last_error: None,
            dedupe_key: options.dedupe_key,
            created_at: now,
            updated_at: now,
        };
        let id = job.id;
        state.jobs.push(job);
        Ok(JobHandle {
            id,
            deduplicated: false,
        })
    }

    async fn reserve(&self, queues: &[&str]) -> JobQueueResult<Option<Job>> {
        let mut state = self.state.lock().await;
        let now = state.now();

        for job in state.jobs.iter_mut().filter(|job| {
            job.status == STATUS_PROCESSING && job.run_after <= now && job.attempts >= job.max_attempts
        }) {
            job.status = STATUS_DEAD.to_string();
            job.last_error = Some("lease expired on final attempt".to_string());
            job.dedupe_key = None;
            job.updated_at = now;
        }

        let next = state
            .jobs
            .iter()
            .filter(|job| {
                (job.status == STATUS_QUEUED || job.status == STATUS_PROCESSING)
                    && job.run_after <= now
                    && job.attempts < job.max_attempts
                    && queues.contains(&job.queue.as_str())
            })
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.run_after.cmp(&b.run_after))
                    .then(a.created_at.cmp(&b.created_at))
            })
            .map(|job| job.id);

        let lease = to_chrono(self.lease);
        Ok(next.and_then(|id| {
            state.job_mut(id).map(|job| {
                job.status = STATUS_PROCESSING.to_string();
                job.attempts += 1;
                job.run_after = now + lease;
                job.updated_at = now;
                job.clone()
            })
        }))
    }

    async fn complete(&self, job_id: Uuid) -> JobQueueResult<()> {
        let mut state = self.state.lock().await;
        let now = state.now();
        if let Some(job) = state.job_mut(job_id) {
            job.status = STATUS_SUCCEEDED.to_string();
            job.last_error = None;
            job.updated_at = now;
        }
        Ok(())
    }

    async fn fail(
        &self,
        job: &Job,
        error: &str,
        retryable: bool,
    ) -> JobQueueResult<FailureDisposition> {
        let disposition = failure_disposition(&self.policy, job, retryable);
        let mut state = self.state.lock().await;
        let now = state.now();
        if let Some(stored) = state.job_mut(job.id) {
            stored.last_error = Some(error.to_string());
            stored.updated_at = now;
            match disposition {
                FailureDisposition::Rescheduled { delay, .. } => {
                    stored.status = STATUS_QUEUED.to_string();
                    stored.run_after = now + to_chrono(delay);
                }
                FailureDisposition::Dead => {
                    stored.status = STATUS_DEAD.to_string();
                    stored.dedupe_key = None;
                }
            }
        }
        Ok(disposition)
    }

    async fn dead_jobs(&self, limit: i64) -> JobQueueResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut dead: Vec<Job> = state
            .jobs
            .iter()
            .filter(|job| job.status == STATUS_DEAD)
            .cloned()
            .collect();
        dead.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        dead.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(dead)
    }

    async fn requeue(&self, job_id: Uuid) -> JobQueueResult<bool> {
        let mut state = self.state.lock().await;
        let now = state.now();
        match state.job_mut(job_id) {
            Some(job) if job.status == STATUS_DEAD => {
                job.status = STATUS_QUEUED.to_string();
                job.attempts = 0;
                job.run_after = now;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn reserves_by_priority_then_age() {
        let queue = MemoryJobQueue::new();
        queue
            .enqueue("notifications", "late", json!({}), EnqueueOptions::default().priority(2))
            .await
            .unwrap();
        let urgent = queue
            .enqueue("notifications", "urgent", json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        queue
            .enqueue("other", "elsewhere", json!({}), EnqueueOptions::default())
            .await
            .unwrap();

        let job = queue.reserve(&["notifications"]).await.unwrap().unwrap();
        assert_eq!(job.id, urgent.id);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.status, STATUS_PROCESSING);

        let job = queue.reserve(&["notifications"]).await.unwrap().unwrap();
        assert_eq!(job.job_type, "late");
        assert!(queue.reserve(&["notifications"]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dedupe_key_suppresses_live_duplicates() {
        let queue = MemoryJobQueue::new();
        let options = EnqueueOptions::default().dedupe_key("appointment:1");
        let first = queue
            .enqueue("notifications", "appointment", json!({}), options.clone())
            .await
            .unwrap();
        let second = queue
            .enqueue("notifications", "appointment", json!({}), options)
            .await
            .unwrap();

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.id, second.id);
        assert_eq!(queue.jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn retries_with_backoff_then_goes_dead() {
        let queue = MemoryJobQueue::new();
        queue
            .enqueue("delivery", "send_message", json!({}), EnqueueOptions::default())
            .await
            .unwrap();

        let mut delays = Vec::new();
        loop {
            let Some(job) = queue.reserve(&["delivery"]).await.unwrap() else {
                break;
            };
            match queue.fail(&job, "provider timeout", true).await.unwrap() {
                FailureDisposition::Rescheduled { delay, .. } => {
                    delays.push(delay);
                    assert!(queue.reserve(&["delivery"]).await.unwrap().is_none());
                    queue.advance_clock(delay).await;
                }
                FailureDisposition::Dead => break,
            }
        }

        assert_eq!(delays, vec![5 * MINUTE, 25 * MINUTE]);
        let dead = queue.dead_jobs(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(dead[0].last_error.as_deref(), Some("provider timeout"));
    }

    #[tokio::test]
    async fn permanent_failure_skips_retries() {
        let queue = MemoryJobQueue::new();
        queue
            .enqueue("delivery", "send_message", json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        let job = queue.reserve(&["delivery"]).await.unwrap().unwrap();
        let disposition = queue.fail(&job, "invalid phone", false).await.unwrap();
        assert_eq!(disposition, FailureDisposition::Dead);
    }

    #[tokio::test]
    async fn expired_lease_redelivers_job() {
        let queue = MemoryJobQueue::new().with_lease(Duration::from_secs(30));
        queue
            .enqueue("reports", "daily_report", json!({}), EnqueueOptions::default())
            .await
            .unwrap();

        let first = queue.reserve(&["reports"]).await.unwrap().unwrap();
        assert!(queue.reserve(&["reports"]).await.unwrap().is_none());

        queue.advance_clock(Duration::from_secs(31)).await;
        let again = queue.reserve(&["reports"]).await.unwrap().unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn requeue_revives_dead_job() {
        let queue = MemoryJobQueue::new();
        let handle = queue
            .enqueue("delivery", "send_message", json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        let job = queue.reserve(&["delivery"]).await.unwrap().unwrap();
        queue.fail(&job, "boom", false).await.unwrap();

        assert!(queue.requeue(handle.id).await.unwrap());
        assert!(!queue.requeue(handle.id).await.unwrap());
        let job = queue.reserve(&["delivery"]).await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);
    }
}
