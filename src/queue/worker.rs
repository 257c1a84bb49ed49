//! Queue Workers
//!
//! Promoter + per-queue worker pools over the Redis backing store, and the
//! shared job execution path used by both the workers and the in-memory
//! fallback.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fred::prelude::*;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use super::jobs::{Job, JobError, JobPayload, QueueName};
use super::{delayed_key, payload_key, ready_key, JobContext, JobQueue};

/// How often the promoter moves due delayed jobs to the ready list.
const PROMOTER_INTERVAL: Duration = Duration::from_secs(1);

/// Batch size per promoter sweep.
const PROMOTER_BATCH: i64 = 100;

/// Move due delayed jobs onto their ready lists.
pub(crate) async fn run_promoter(queue: Arc<JobQueue>, mut shutdown: watch::Receiver<bool>) {
    let Some(redis) = queue.redis_client().cloned() else {
        return;
    };

    let mut ticker = tokio::time::interval(PROMOTER_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let now_ms = Utc::now().timestamp_millis() as f64;
        for name in QueueName::ALL {
            let due: Vec<String> = match redis
                .zrangebyscore(
                    delayed_key(name),
                    0.0,
                    now_ms,
                    false,
                    Some((0, PROMOTER_BATCH)),
                )
                .await
            {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(queue = %name, error = %e, "Promoter scan failed");
                    continue;
                }
            };

            for id in due {
                // ZREM is the claim: exactly one promoter instance wins.
                let removed: i64 = match redis.zrem(delayed_key(name), id.as_str()).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(job_id = %id, error = %e, "Promoter claim failed");
                        continue;
                    }
                };
                if removed == 1 {
                    if let Err(e) = redis.lpush::<(), _, _>(ready_key(name), id.as_str()).await {
                        warn!(job_id = %id, error = %e, "Promoter push failed");
                    } else {
                        debug!(job_id = %id, queue = %name, "Job promoted to ready");
                    }
                }
            }
        }
    }
}

/// Poll one queue's ready list and execute jobs on a bounded pool.
pub(crate) async fn run_worker(
    queue: Arc<JobQueue>,
    name: QueueName,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some(redis) = queue.redis_client().cloned() else {
        return;
    };

    let concurrency = name.concurrency();
    let semaphore = Arc::new(Semaphore::new(concurrency));
    info!(queue = %name, concurrency, "Queue worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        // BRPOP with a 5-second timeout so shutdown is noticed promptly.
        let popped: Result<Option<(String, String)>, RedisError> = tokio::select! {
            _ = shutdown.changed() => break,
            result = redis.brpop(ready_key(name), 5.0) => result,
        };

        let id = match popped {
            Ok(Some((_key, id))) => id,
            Ok(None) => continue,
            Err(e) => {
                error!(queue = %name, error = %e, "Ready list poll failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        // The payload hash is the source of truth: a missing entry means
        // the job was cancelled between scheduling and delivery.
        let payload: Option<String> = match redis.hget(payload_key(name), id.as_str()).await {
            Ok(p) => p,
            Err(e) => {
                warn!(job_id = %id, error = %e, "Payload load failed, dropping");
                continue;
            }
        };
        let Some(payload) = payload else {
            debug!(job_id = %id, queue = %name, "Job cancelled before execution");
            continue;
        };
        let _ = redis.hdel::<(), _, _>(payload_key(name), id.as_str()).await;

        let job: Job = match serde_json::from_str(&payload) {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = %id, error = %e, "Undecodable job payload, dropping");
                continue;
            }
        };

        let Some(ctx) = queue.context().cloned() else {
            error!(job_id = %id, "Job dropped: queue context not installed");
            continue;
        };

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        tokio::spawn(async move {
            run_job(ctx, job).await;
            drop(permit);
        });
    }

    // Drain: wait for every in-flight job before reporting stopped.
    let _ = semaphore.acquire_many(concurrency as u32).await;
    info!(queue = %name, "Queue worker stopped");
}

/// Execute one job and apply the retry policy on failure.
pub(crate) fn run_job(ctx: JobContext, mut job: Job) -> BoxFuture<'static, ()> {
    async move {
        debug!(job_id = %job.id, queue = %job.queue, attempt = job.attempt, "Job started");

        match dispatch(&ctx, &job).await {
            Ok(()) => {
                debug!(job_id = %job.id, queue = %job.queue, "Job completed");
            }
            Err(err) if err.retryable && job.attempt + 1 < job.queue.max_attempts() => {
                job.attempt += 1;
                warn!(
                    job_id = %job.id,
                    queue = %job.queue,
                    attempt = job.attempt,
                    error = %err,
                    "Job failed, scheduling retry"
                );
                ctx.queue.retry(job).await;
            }
            Err(err) => {
                // Dead letter: exhausted retries or a permanent failure.
                error!(
                    job_id = %job.id,
                    queue = %job.queue,
                    attempt = job.attempt,
                    error = %err,
                    "Job dead-lettered"
                );
            }
        }
    }
    .boxed()
}

/// Route a payload to its handler.
async fn dispatch(ctx: &JobContext, job: &Job) -> Result<(), JobError> {
    match &job.payload {
        JobPayload::Reminder(reminder) => crate::scheduler::run_reminder_job(ctx, reminder).await,
        JobPayload::ReminderEmail(email) => crate::email::run_reminder_email(ctx, email).await,
        JobPayload::MinutesEmail(email) => crate::email::run_minutes_email(ctx, email).await,
        JobPayload::MomGeneration(generation) => {
            crate::minutes::pipeline::run_generation_job(ctx, generation).await
        }
        JobPayload::Recording(recording) => {
            crate::recordings::run_post_process_job(ctx, recording).await
        }
    }
}
