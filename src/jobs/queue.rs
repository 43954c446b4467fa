//! Job storage: the `JobStore` seam and its Redis implementation.
//!
//! # Queue Structure
//!
//! - `{queue}`: list of ready jobs (LPUSH in, BRPOPLPUSH out)
//! - `{queue}:processing`: jobs handed to a worker (for crash recovery)
//! - `{queue}:delayed`: sorted set of jobs waiting for `run_at` (score in epoch ms)
//! - `{queue}:dead_letter`: jobs that exhausted their attempts
//! - `{queue}:results:{id}`: job results with a TTL
//!
//! Jobs are atomically moved from the ready list to the processing list when
//! dequeued. If a worker crashes, [`JobStore::recover_processing`] puts them
//! back.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use super::job::{DeadLetterEntry, Job, JobResult};

/// Upper bound on delayed jobs promoted in one call.
const PROMOTE_BATCH: usize = 500;

/// Moves due members of the delayed set onto the ready list atomically.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, job in ipairs(due) do
    redis.call('ZREM', KEYS[1], job)
    redis.call('LPUSH', KEYS[2], job)
end
return #due
"#;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Statistics about queue state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub queue_name: String,
    /// Jobs ready to run.
    pub pending_jobs: usize,
    /// Jobs handed to a worker.
    pub processing_jobs: usize,
    /// Jobs waiting for their `run_at`.
    pub delayed_jobs: usize,
    pub dead_letter_jobs: usize,
}

impl QueueStats {
    pub fn total_jobs(&self) -> usize {
        self.pending_jobs + self.processing_jobs + self.delayed_jobs + self.dead_letter_jobs
    }
}

/// Durable job storage shared by producers and the worker pool.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Adds a job; jobs with a future `run_at` go to the delayed set.
    async fn enqueue(&self, job: Job) -> Result<(), QueueError>;

    async fn enqueue_batch(&self, jobs: Vec<Job>) -> Result<(), QueueError>;

    /// Waits up to `timeout` for a ready job and marks it as processing.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, QueueError>;

    /// Stores the result and releases the job from processing.
    async fn complete(&self, job: &Job, result: JobResult) -> Result<(), QueueError>;

    /// Releases the job from processing and parks it until `run_at`.
    async fn schedule_retry(&self, job: Job, run_at: DateTime<Utc>) -> Result<(), QueueError>;

    /// Releases the job from processing into the dead-letter queue.
    async fn dead_letter(&self, job: Job, error: &str) -> Result<(), QueueError>;

    /// Moves delayed jobs whose `run_at` has passed onto the ready list.
    async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize, QueueError>;

    /// Requeues jobs left in processing by a crashed worker.
    async fn recover_processing(&self) -> Result<usize, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Newest dead-lettered jobs first.
    async fn peek_dead_letter(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError>;

    /// Requeues up to `limit` of the oldest dead-lettered jobs with a fresh
    /// attempt budget.
    async fn replay_dead_letter(&self, limit: usize) -> Result<usize, QueueError>;

    async fn get_result(&self, job_id: Uuid) -> Result<Option<JobResult>, QueueError>;

    /// Deletes stored results completed before `before`.
    async fn purge_results(&self, before: DateTime<Utc>) -> Result<usize, QueueError>;

    async fn ping(&self) -> Result<(), QueueError>;
}

/// Redis-based job queue with reliable dequeue.
#[derive(Clone)]
pub struct RedisJobQueue {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    queue_name: String,
    processing_queue: String,
    delayed_queue: String,
    dead_letter_queue: String,
    results_prefix: String,
    result_ttl: Duration,
}

impl RedisJobQueue {
    /// Connects to Redis and creates a new job queue.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(
        redis_url: &str,
        queue_name: &str,
        result_ttl: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, queue_name, result_ttl))
    }

    /// Creates a queue from an existing connection manager, e.g. the one
    /// shared with the cache.
    pub fn from_connection(redis: ConnectionManager, queue_name: &str, result_ttl: Duration) -> Self {
        Self {
            redis,
            queue_name: queue_name.to_string(),
            processing_queue: format!("{}:processing", queue_name),
            delayed_queue: format!("{}:delayed", queue_name),
            dead_letter_queue: format!("{}:dead_letter", queue_name),
            results_prefix: format!("{}:results:", queue_name),
            result_ttl,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    fn result_key(&self, job_id: Uuid) -> String {
        format!("{}{}", self.results_prefix, job_id)
    }

    /// Finds the processing-list entry of a job by id.
    ///
    /// Workers mutate jobs after dequeue, so the stored payload can differ
    /// from the in-flight job.
    async fn find_processing_entry(&self, job_id: Uuid) -> Result<Option<String>, QueueError> {
        let mut conn = self.redis.clone();
        let entries: Vec<String> = conn.lrange(&self.processing_queue, 0, -1).await?;
        Ok(entries.into_iter().find(|data| {
            serde_json::from_str::<Job>(data)
                .map(|job| job.id == job_id)
                .unwrap_or(false)
        }))
    }

    /// Removes a job from processing and runs `then` in the same transaction.
    async fn release_with(
        &self,
        job_id: Uuid,
        then: impl FnOnce(&mut redis::Pipeline),
    ) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        if let Some(entry) = self.find_processing_entry(job_id).await? {
            pipe.lrem(&self.processing_queue, 1, entry).ignore();
        }
        then(&mut pipe);
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisJobQueue {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        self.enqueue_batch(vec![job]).await
    }

    async fn enqueue_batch(&self, jobs: Vec<Job>) -> Result<(), QueueError> {
        if jobs.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut pipe = redis::pipe();
        for job in &jobs {
            let data = serde_json::to_string(job)?;
            if job.is_due(now) {
                pipe.lpush(&self.queue_name, data).ignore();
            } else {
                pipe.zadd(&self.delayed_queue, data, job.run_at.timestamp_millis())
                    .ignore();
            }
        }

        let mut conn = self.redis.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, QueueError> {
        let mut conn = self.redis.clone();
        let timeout_secs = timeout.as_secs().max(1) as usize;

        // BRPOPLPUSH atomically pops from source and pushes to destination
        let result: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queue_name)
            .arg(&self.processing_queue)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        match result {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn complete(&self, job: &Job, result: JobResult) -> Result<(), QueueError> {
        let data = serde_json::to_string(&result)?;
        let key = self.result_key(job.id);
        let ttl = self.result_ttl.as_secs().max(1);
        self.release_with(job.id, |pipe| {
            pipe.cmd("SET").arg(&key).arg(&data).arg("EX").arg(ttl).ignore();
        })
        .await
    }

    async fn schedule_retry(&self, job: Job, run_at: DateTime<Utc>) -> Result<(), QueueError> {
        let job = job.with_run_at(run_at);
        let data = serde_json::to_string(&job)?;
        self.release_with(job.id, |pipe| {
            pipe.zadd(&self.delayed_queue, &data, run_at.timestamp_millis())
                .ignore();
        })
        .await
    }

    async fn dead_letter(&self, job: Job, error: &str) -> Result<(), QueueError> {
        let job_id = job.id;
        let data = serde_json::to_string(&DeadLetterEntry::new(job, error))?;
        self.release_with(job_id, |pipe| {
            pipe.lpush(&self.dead_letter_queue, &data).ignore();
        })
        .await
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let promoted: usize = redis::Script::new(PROMOTE_SCRIPT)
            .key(&self.delayed_queue)
            .key(&self.queue_name)
            .arg(now.timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await?;
        Ok(promoted)
    }

    async fn recover_processing(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let mut recovered = 0;

        let entries: Vec<String> = conn.lrange(&self.processing_queue, 0, -1).await?;
        for data in entries {
            let Ok(mut job) = serde_json::from_str::<Job>(&data) else {
                warn!(queue = %self.queue_name, "Dropping unreadable job from processing queue");
                conn.lrem::<_, _, ()>(&self.processing_queue, 1, &data).await?;
                continue;
            };

            // the interrupted run counts as an attempt
            job.increment_attempts();

            let mut pipe = redis::pipe();
            pipe.atomic().lrem(&self.processing_queue, 1, &data).ignore();
            if job.should_retry() {
                pipe.rpush(&self.queue_name, serde_json::to_string(&job)?)
                    .ignore();
                recovered += 1;
            } else {
                let entry = DeadLetterEntry::new(job, "Recovered from processing queue after max attempts");
                pipe.lpush(&self.dead_letter_queue, serde_json::to_string(&entry)?)
                    .ignore();
            }
            pipe.query_async::<_, ()>(&mut conn).await?;
        }

        Ok(recovered)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.redis.clone();
        let (pending, processing, delayed, dead): (usize, usize, usize, usize) = redis::pipe()
            .llen(&self.queue_name)
            .llen(&self.processing_queue)
            .zcard(&self.delayed_queue)
            .llen(&self.dead_letter_queue)
            .query_async(&mut conn)
            .await?;

        Ok(QueueStats {
            queue_name: self.queue_name.clone(),
            pending_jobs: pending,
            processing_jobs: processing,
            delayed_jobs: delayed,
            dead_letter_jobs: dead,
        })
    }

    async fn peek_dead_letter(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.clone();
        let data: Vec<String> = conn
            .lrange(&self.dead_letter_queue, 0, limit as isize - 1)
            .await?;

        let entries: Result<Vec<DeadLetterEntry>, _> =
            data.iter().map(|s| serde_json::from_str(s)).collect();
        Ok(entries?)
    }

    async fn replay_dead_letter(&self, limit: usize) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let mut replayed = 0;

        while replayed < limit {
            let data: Option<String> = conn.rpop(&self.dead_letter_queue, None).await?;
            let Some(data) = data else {
                break;
            };

            match serde_json::from_str::<DeadLetterEntry>(&data) {
                Ok(entry) => {
                    let job = revive(entry);
                    conn.lpush::<_, _, ()>(&self.queue_name, serde_json::to_string(&job)?)
                        .await?;
                    replayed += 1;
                }
                Err(e) => {
                    // keep unreadable entries for inspection, at the head
                    conn.lpush::<_, _, ()>(&self.dead_letter_queue, &data).await?;
                    warn!(error = %e, "Stopping replay at unreadable dead-letter entry");
                    break;
                }
            }
        }

        Ok(replayed)
    }

    async fn get_result(&self, job_id: Uuid) -> Result<Option<JobResult>, QueueError> {
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.get(self.result_key(job_id)).await?;
        match data {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn purge_results(&self, before: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let pattern = format!("{}*", self.results_prefix);
        let mut cursor: u64 = 0;
        let mut purged = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await?;

            for key in keys {
                let data: Option<String> = conn.get(&key).await?;
                let stale = data
                    .and_then(|d| serde_json::from_str::<JobResult>(&d).ok())
                    .map(|r| r.completed_at < before)
                    .unwrap_or(true);
                if stale {
                    conn.del::<_, ()>(&key).await?;
                    purged += 1;
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(purged)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Turns a dead-letter entry back into a runnable job.
pub(crate) fn revive(entry: DeadLetterEntry) -> Job {
    let mut job = entry.job;
    job.attempts = 0;
    job.last_error = Some(entry.error);
    job.run_at = Utc::now();
    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::JobKind;

    fn job() -> Job {
        Job::system(JobKind::Notify {
            recipient: "ops".into(),
            channel: "webhook".into(),
            message: "hello".into(),
        })
    }

    #[test]
    fn test_queue_stats_total() {
        let stats = QueueStats {
            queue_name: "test".to_string(),
            pending_jobs: 10,
            processing_jobs: 5,
            delayed_jobs: 3,
            dead_letter_jobs: 2,
        };
        assert_eq!(stats.total_jobs(), 20);
    }

    #[test]
    fn test_revive_resets_attempts() {
        let mut dead = job();
        dead.attempts = 3;
        let revived = revive(DeadLetterEntry::new(dead, "smtp timeout"));
        assert_eq!(revived.attempts, 0);
        assert_eq!(revived.last_error.as_deref(), Some("smtp timeout"));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    async fn test_redis_retry_and_promotion() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let name = format!("qgov-test:{}", Uuid::new_v4());
        let queue = RedisJobQueue::connect(&url, &name, Duration::from_secs(60))
            .await
            .unwrap();

        queue.enqueue(job()).await.unwrap();
        let taken = queue.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(queue.stats().await.unwrap().processing_jobs, 1);

        let run_at = Utc::now() + chrono::Duration::seconds(30);
        queue.schedule_retry(taken, run_at).await.unwrap();
        let stats = queue.stats().await.unwrap();
        assert_eq!((stats.processing_jobs, stats.delayed_jobs), (0, 1));

        assert_eq!(queue.promote_due(Utc::now()).await.unwrap(), 0);
        assert_eq!(queue.promote_due(run_at).await.unwrap(), 1);
        assert_eq!(queue.stats().await.unwrap().pending_jobs, 1);
    }
}
