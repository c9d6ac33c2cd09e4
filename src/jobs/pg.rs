use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use tokio::task;
use uuid::Uuid;

use super::{
    failure_disposition, to_chrono, EnqueueOptions, FailureDisposition, JobHandle, JobQueue,
    JobQueueError, JobQueueResult, DEFAULT_LEASE, STATUS_DEAD, STATUS_PROCESSING, STATUS_QUEUED,
    STATUS_SUCCEEDED,
};
use crate::db::PgPool;
use crate::models::{Job, NewJob};
use crate::retry::RetryPolicy;
use crate::schema::jobs;

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
    policy: RetryPolicy,
    lease: Duration,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            policy: RetryPolicy::default(),
            lease: DEFAULT_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    async fn with_conn<T, F>(&self, f: F) -> JobQueueResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> JobQueueResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| JobQueueError::Unavailable(err.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|err| JobQueueError::Unavailable(format!("queue task failed: {err}")))?
    }
}

pub fn enqueue_job(
    conn: &mut PgConnection,
    queue: &str,
    job_type: &str,
    payload: Value,
    options: &EnqueueOptions,
) -> JobQueueResult<JobHandle> {
    let now = Utc::now().naive_utc();
    let new_job = NewJob {
        id: Uuid::new_v4(),
        queue: queue.to_string(),
        job_type: job_type.to_string(),
        payload,
        status: STATUS_QUEUED.to_string(),
        priority: options.priority,
        max_attempts: options.max_attempts,
        run_after: options.delay.map_or(now, |delay| now + to_chrono(delay)),
        dedupe_key: options.dedupe_key.clone(),
    };

    let inserted = diesel::insert_into(jobs::table)
        .values(&new_job)
        .on_conflict_do_nothing()
        .execute(conn)?;

    if inserted > 0 {
        return Ok(JobHandle {
            id: new_job.id,
            deduplicated: false,
        });
    }

    let existing = jobs::table
        .filter(jobs::dedupe_key.eq(&new_job.dedupe_key))
        .filter(jobs::status.ne(STATUS_DEAD))
        .select(jobs::id)
        .first::<Uuid>(conn)?;
    Ok(JobHandle {
        id: existing,
        deduplicated: true,
    })
}

pub fn reserve_job(
    conn: &mut PgConnection,
    queues: &[String],
    lease: Duration,
) -> JobQueueResult<Option<Job>> {
    let now = Utc::now().naive_utc();

    conn.transaction(|conn| {
        // Leases that ran out on the final attempt will never be picked up again.
        diesel::update(
            jobs::table
                .filter(jobs::status.eq(STATUS_PROCESSING))
                .filter(jobs::run_after.le(now))
                .filter(jobs::attempts.ge(jobs::max_attempts)),
        )
        .set((
            jobs::status.eq(STATUS_DEAD),
            jobs::last_error.eq(Some("lease expired on final attempt")),
            jobs::dedupe_key.eq::<Option<String>>(None),
            jobs::updated_at.eq(now),
        ))
        .execute(conn)?;

        let job_opt = jobs::table
            .filter(jobs::status.eq_any([STATUS_QUEUED, STATUS_PROCESSING]))
            .filter(jobs::run_after.le(now))
            .filter(jobs::attempts.lt(jobs::max_attempts))
            .filter(jobs::queue.eq_any(queues))
            .order((
                jobs::priority.asc(),
                jobs::run_after.asc(),
                jobs::created_at.asc(),
            ))
            .for_update()
            .skip_locked()
            .first::<Job>(conn)
            .optional()?;

        if let Some(job) = job_opt {
            let refreshed = diesel::update(jobs::table.find(job.id))
                .set((
                    jobs::status.eq(STATUS_PROCESSING),
                    jobs::attempts.eq(job.attempts + 1),
                    jobs::run_after.eq(now + to_chrono(lease)),
                    jobs::updated_at.eq(now),
                ))
                .get_result::<Job>(conn)?;
            Ok::<Option<Job>, diesel::result::Error>(Some(refreshed))
        } else {
            Ok::<Option<Job>, diesel::result::Error>(None)
        }
    })
    .map_err(JobQueueError::from)
}

pub fn mark_job_succeeded(conn: &mut PgConnection, job_id: Uuid) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_SUCCEEDED),
            jobs::last_error.eq::<Option<String>>(None),
            jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn retry_job_after(
    conn: &mut PgConnection,
    job_id: Uuid,
    delay: Duration,
    error_message: &str,
) -> JobQueueResult<()> {
    let now = Utc::now().naive_utc();
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_QUEUED),
            jobs::run_after.eq(now + to_chrono(delay)),
            jobs::last_error.eq(Some(error_message.to_string())),
            jobs::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

/// Dead jobs release their dedupe key so the same work can be enqueued again.
pub fn mark_job_dead(
    conn: &mut PgConnection,
    job_id: Uuid,
    error_message: &str,
) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_DEAD),
            jobs::last_error.eq(Some(error_message.to_string())),
            jobs::dedupe_key.eq::<Option<String>>(None),
            jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> JobQueueResult<JobHandle> {
        let queue = queue.to_string();
        let job_type = job_type.to_string();
        self.with_conn(move |conn| enqueue_job(conn, &queue, &job_type, payload, &options))
            .await
    }

    async fn reserve(&self, queues: &[&str]) -> JobQueueResult<Option<Job>> {
        let queues: Vec<String> = queues.iter().map(|queue| queue.to_string()).collect();
        let lease = self.lease;
        self.with_conn(move |conn| reserve_job(conn, &queues, lease))
            .await
    }

    async fn complete(&self, job_id: Uuid) -> JobQueueResult<()> {
        self.with_conn(move |conn| mark_job_succeeded(conn, job_id))
            .await
    }

    async fn fail(
        &self,
        job: &Job,
        error: &str,
        retryable: bool,
    ) -> JobQueueResult<FailureDisposition> {
        let disposition = failure_disposition(&self.policy, job, retryable);
        let job_id = job.id;
        let error = error.to_string();
        self.with_conn(move |conn| {
            match disposition {
                FailureDisposition::Rescheduled { delay, .. } => {
                    retry_job_after(conn, job_id, delay, &error)?
                }
                FailureDisposition::Dead => mark_job_dead(conn, job_id, &error)?,
            }
            Ok(disposition)
        })
        .await
    }

    async fn dead_jobs(&self, limit: i64) -> JobQueueResult<Vec<Job>> {
        self.with_conn(move |conn| {
            let rows = jobs::table
                .filter(jobs::status.eq(STATUS_DEAD))
                .order(jobs::updated_at.desc())
                .limit(limit)
                .load::<Job>(conn)?;
            Ok(rows)
        })
        .await
    }

    async fn requeue(&self, job_id: Uuid) -> JobQueueResult<bool> {
        self.with_conn(move |conn| {
            let now = Utc::now().naive_utc();
            let updated = diesel::update(
                jobs::table
                    .find(job_id)
                    .filter(jobs::status.eq(STATUS_DEAD)),
            )
            .set((
                jobs::status.eq(STATUS_QUEUED),
                jobs::attempts.eq(0),
                jobs::run_after.eq(now),
                jobs::updated_at.eq(now),
            ))
            .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }
}
