//! Job Queue
//!
//! Durable delayed + immediate queues over Redis, with an in-memory fallback
//! so a single-node deployment (or a Redis outage) still delivers every job.
//!
//! Redis layout per queue:
//! - `jobs:<queue>:payload`: hash of job ID to serialized job. Removing a
//!   payload cancels the job; pollers skip IDs with no payload.
//! - `jobs:<queue>:delayed`: sorted set, job ID scored by `not_before` ms.
//! - `jobs:<queue>:ready`: list, LPUSH/BRPOP (FIFO).
//!
//! A promoter task moves due delayed jobs to the ready list; per-queue
//! worker pools execute them with exponential backoff and dead-letter
//! logging on exhaustion.

pub mod jobs;
mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use fred::prelude::*;
use sqlx::PgPool;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::Cache;
use crate::config::Config;
use crate::email::EmailService;
use crate::error::{ApiError, ApiResult};
use crate::minutes::llm::LlmClient;

pub use jobs::{
    Job, JobError, JobPayload, MinutesEmailJob, MomGenerationJob, QueueName, RecordingJob,
    ReminderEmailJob, ReminderJob,
};

/// Everything a job handler needs. Installed once at startup.
#[derive(Clone)]
pub struct JobContext {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub cache: Cache,
    pub email: Option<Arc<EmailService>>,
    pub llm: Option<Arc<LlmClient>>,
    pub queue: Arc<JobQueue>,
}

/// The job queue. One instance per process.
pub struct JobQueue {
    redis: Option<RedisClient>,
    ctx: OnceLock<JobContext>,
    /// In-memory fallback timers for delayed jobs, keyed by job ID so
    /// cancellation can abort them.
    timers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl JobQueue {
    /// Create the queue. `None` for Redis puts the queue in permanent
    /// in-memory fallback mode.
    #[must_use]
    pub fn new(redis: Option<RedisClient>) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        if redis.is_none() {
            warn!("Job queue running in in-memory fallback mode (no Redis)");
        }
        Arc::new(Self {
            redis,
            ctx: OnceLock::new(),
            timers: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Install the handler context. Must happen before `start`.
    pub fn install_context(&self, ctx: JobContext) {
        if self.ctx.set(ctx).is_err() {
            warn!("Job context installed twice, keeping the first");
        }
    }

    pub(crate) fn context(&self) -> Option<&JobContext> {
        self.ctx.get()
    }

    pub(crate) fn redis_client(&self) -> Option<&RedisClient> {
        self.redis.as_ref()
    }

    /// Spawn the promoter and per-queue worker pools. No-op in fallback
    /// mode, where jobs execute in ad-hoc tasks.
    pub async fn start(self: Arc<Self>) {
        if self.redis.is_none() {
            return;
        }

        let mut handles = self.workers.lock().await;

        let promoter = tokio::spawn(worker::run_promoter(
            Arc::clone(&self),
            self.shutdown_tx.subscribe(),
        ));
        handles.push(promoter);

        for name in QueueName::ALL {
            let handle = tokio::spawn(worker::run_worker(
                Arc::clone(&self),
                name,
                self.shutdown_tx.subscribe(),
            ));
            handles.push(handle);
        }

        info!("Job queue workers started");
    }

    /// Enqueue a job. Duplicate IDs are accepted and ignored (idempotent
    /// enqueue). A Redis failure transparently downgrades to the in-memory
    /// fallback; only a closed queue rejects.
    pub async fn enqueue(&self, job: Job) -> ApiResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ApiError::Unavailable("Queue is shutting down".to_string()));
        }

        if self.redis.is_some() {
            match self.enqueue_redis(&job).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Redis enqueue failed, using in-memory fallback");
                }
            }
        }

        self.enqueue_fallback(job).await;
        Ok(())
    }

    /// Cancel a job by ID. Removes the stored payload (pollers skip it) and
    /// any delayed entry or fallback timer.
    pub async fn cancel(&self, queue: QueueName, job_id: &str) {
        if let Some(redis) = &self.redis {
            if let Err(e) = redis
                .hdel::<(), _, _>(payload_key(queue), job_id)
                .await
            {
                warn!(job_id = %job_id, error = %e, "Cancel: payload removal failed");
            }
            if let Err(e) = redis.zrem::<(), _, _>(delayed_key(queue), job_id).await {
                warn!(job_id = %job_id, error = %e, "Cancel: delayed removal failed");
            }
        }

        if let Some(handle) = self.timers.lock().await.remove(job_id) {
            handle.abort();
            debug!(job_id = %job_id, "Cancelled in-memory timer");
        }
    }

    /// Graceful shutdown: reject new jobs, stop polling, let in-flight jobs
    /// finish within a bounded deadline, abort the rest.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if tokio::time::timeout(Duration::from_secs(30), handle)
                .await
                .is_err()
            {
                warn!("Queue worker did not drain within deadline");
            }
        }

        for (id, handle) in self.timers.lock().await.drain() {
            handle.abort();
            debug!(job_id = %id, "Aborted pending timer on shutdown");
        }

        info!("Job queue shut down");
    }

    async fn enqueue_redis(&self, job: &Job) -> Result<(), RedisError> {
        let Some(redis) = self.redis.as_ref() else {
            return Err(RedisError::new(RedisErrorKind::Config, "Redis not configured"));
        };
        let payload = serde_json::to_string(job)
            .map_err(|e| RedisError::new(RedisErrorKind::Parse, e.to_string()))?;

        let inserted: bool = redis
            .hsetnx(payload_key(job.queue), job.id.as_str(), payload.as_str())
            .await?;
        if !inserted {
            debug!(job_id = %job.id, "Duplicate job ID, enqueue ignored");
            return Ok(());
        }

        if job.is_delayed(Utc::now()) {
            redis
                .zadd::<(), _, _>(
                    delayed_key(job.queue),
                    None,
                    None,
                    false,
                    false,
                    (job.not_before_ms as f64, job.id.as_str()),
                )
                .await?;
        } else {
            redis
                .lpush::<(), _, _>(ready_key(job.queue), job.id.as_str())
                .await?;
        }

        debug!(job_id = %job.id, queue = %job.queue, "Job enqueued");
        Ok(())
    }

    /// Re-store a job for a retry attempt: payload overwrite plus a delayed
    /// entry at the backoff deadline.
    pub(crate) async fn requeue_redis(&self, job: &Job, delay: Duration) -> Result<(), RedisError> {
        let Some(redis) = self.redis.as_ref() else {
            return Err(RedisError::new(RedisErrorKind::Config, "Redis not configured"));
        };
        let payload = serde_json::to_string(job)
            .map_err(|e| RedisError::new(RedisErrorKind::Parse, e.to_string()))?;
        let due_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        redis
            .hset::<(), _, _>(payload_key(job.queue), (job.id.as_str(), payload.as_str()))
            .await?;
        redis
            .zadd::<(), _, _>(
                delayed_key(job.queue),
                None,
                None,
                false,
                false,
                (due_ms as f64, job.id.as_str()),
            )
            .await?;
        Ok(())
    }

    /// In-memory fallback: delayed jobs run off an abortable timer,
    /// immediate jobs run in a fresh task right away.
    async fn enqueue_fallback(&self, job: Job) {
        let Some(ctx) = self.ctx.get().cloned() else {
            error!(job_id = %job.id, "Job dropped: queue context not installed");
            return;
        };

        let now = Utc::now();
        if job.is_delayed(now) {
            let delay = Duration::from_millis((job.not_before_ms - now.timestamp_millis()) as u64);
            let job_id = job.id.clone();
            let timers = Arc::clone(&self.timers);
            let timer_id = job_id.clone();

            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                worker::run_job(ctx, job).await;
                timers.lock().await.remove(&timer_id);
            });

            // Last write wins on duplicate IDs, matching HSETNX-then-skip
            // closely enough for the fallback path.
            if let Some(previous) = self
                .timers
                .lock()
                .await
                .insert(job_id, handle)
            {
                previous.abort();
            }
        } else {
            tokio::spawn(worker::run_job(ctx, job));
        }
    }

    /// Schedule a retry for a failed job, in whichever mode the queue runs.
    pub(crate) async fn retry(&self, job: Job) {
        let delay = job.backoff_delay();

        if self.redis.is_some() {
            if let Err(e) = self.requeue_redis(&job, delay).await {
                warn!(job_id = %job.id, error = %e, "Retry requeue failed, using fallback timer");
            } else {
                return;
            }
        }

        let mut job = job;
        job.not_before_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        self.enqueue_fallback(job).await;
    }
}

pub(crate) fn payload_key(queue: QueueName) -> String {
    format!("jobs:{queue}:payload")
}

pub(crate) fn delayed_key(queue: QueueName) -> String {
    format!("jobs:{queue}:delayed")
}

pub(crate) fn ready_key(queue: QueueName) -> String {
    format!("jobs:{queue}:ready")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(payload_key(QueueName::Email), "jobs:email:payload");
        assert_eq!(
            delayed_key(QueueName::MomGeneration),
            "jobs:momGeneration:delayed"
        );
        assert_eq!(ready_key(QueueName::Recording), "jobs:recording:ready");
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let queue = JobQueue::new(None);
        queue.closed.store(true, Ordering::SeqCst);

        let job = Job::immediate(JobPayload::MomGeneration(MomGenerationJob {
            meeting_id: "ABC-123-XYZ".into(),
        }));
        assert!(queue.enqueue(job).await.is_err());
    }

    #[tokio::test]
    async fn test_fallback_cancel_clears_timer() {
        let queue = JobQueue::new(None);
        // Seed a pending timer directly; cancel must abort and remove it.
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        queue
            .timers
            .lock()
            .await
            .insert("reminder-ABC-123-XYZ-30".into(), handle);

        queue
            .cancel(QueueName::Reminder, "reminder-ABC-123-XYZ-30")
            .await;
        assert!(queue.timers.lock().await.is_empty());
    }
}
