//! In-process job store mirroring the Redis queue layout.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use super::job::{DeadLetterEntry, Job, JobResult};
use super::queue::{revive, JobStore, QueueError, QueueStats};

#[derive(Debug, Default)]
struct QueueState {
    /// Front is the next job out.
    pending: VecDeque<Job>,
    processing: HashMap<Uuid, Job>,
    delayed: Vec<Job>,
    /// Front is the newest entry.
    dead_letter: VecDeque<DeadLetterEntry>,
    results: HashMap<Uuid, JobResult>,
}

/// Job store used when Redis is not configured, and in tests.
#[derive(Debug)]
pub struct MemoryJobQueue {
    name: String,
    state: Mutex<QueueState>,
    ready: Notify,
}

impl MemoryJobQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            ready: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, job: Job, now: DateTime<Utc>) {
        let mut state = self.state();
        if job.is_due(now) {
            state.pending.push_back(job);
            drop(state);
            self.ready.notify_one();
        } else {
            state.delayed.push(job);
        }
    }

    fn try_take(&self) -> Option<Job> {
        let mut state = self.state();
        let job = state.pending.pop_front()?;
        state.processing.insert(job.id, job.clone());
        Some(job)
    }
}

#[async_trait]
impl JobStore for MemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        self.push(job, Utc::now());
        Ok(())
    }

    async fn enqueue_batch(&self, jobs: Vec<Job>) -> Result<(), QueueError> {
        let now = Utc::now();
        for job in jobs {
            self.push(job, now);
        }
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.ready.notified();
            if let Some(job) = self.try_take() {
                return Ok(Some(job));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.try_take());
            }
        }
    }

    async fn complete(&self, job: &Job, result: JobResult) -> Result<(), QueueError> {
        let mut state = self.state();
        state.processing.remove(&job.id);
        state.results.insert(job.id, result);
        Ok(())
    }

    async fn schedule_retry(&self, job: Job, run_at: DateTime<Utc>) -> Result<(), QueueError> {
        let mut state = self.state();
        state.processing.remove(&job.id);
        state.delayed.push(job.with_run_at(run_at));
        Ok(())
    }

    async fn dead_letter(&self, job: Job, error: &str) -> Result<(), QueueError> {
        let mut state = self.state();
        state.processing.remove(&job.id);
        state.dead_letter.push_front(DeadLetterEntry::new(job, error));
        Ok(())
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut state = self.state();
        let (mut due, waiting): (Vec<Job>, Vec<Job>) =
            std::mem::take(&mut state.delayed)
                .into_iter()
                .partition(|job| job.is_due(now));
        state.delayed = waiting;
        due.sort_by_key(|job| job.run_at);

        let promoted = due.len();
        state.pending.extend(due);
        drop(state);

        for _ in 0..promoted {
            self.ready.notify_one();
        }
        Ok(promoted)
    }

    async fn recover_processing(&self) -> Result<usize, QueueError> {
        let mut state = self.state();
        let stuck: Vec<Job> = state.processing.drain().map(|(_, job)| job).collect();
        let mut recovered = 0;

        for mut job in stuck {
            job.increment_attempts();
            if job.should_retry() {
                state.pending.push_front(job);
                recovered += 1;
            } else {
                state.dead_letter.push_front(DeadLetterEntry::new(
                    job,
                    "Recovered from processing queue after max attempts",
                ));
            }
        }
        Ok(recovered)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.state();
        Ok(QueueStats {
            queue_name: self.name.clone(),
            pending_jobs: state.pending.len(),
            processing_jobs: state.processing.len(),
            delayed_jobs: state.delayed.len(),
            dead_letter_jobs: state.dead_letter.len(),
        })
    }

    async fn peek_dead_letter(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError> {
        Ok(self.state().dead_letter.iter().take(limit).cloned().collect())
    }

    async fn replay_dead_letter(&self, limit: usize) -> Result<usize, QueueError> {
        let mut state = self.state();
        let mut replayed = 0;
        while replayed < limit {
            let Some(entry) = state.dead_letter.pop_back() else {
                break;
            };
            state.pending.push_back(revive(entry));
            replayed += 1;
        }
        drop(state);

        for _ in 0..replayed {
            self.ready.notify_one();
        }
        Ok(replayed)
    }

    async fn get_result(&self, job_id: Uuid) -> Result<Option<JobResult>, QueueError> {
        Ok(self.state().results.get(&job_id).cloned())
    }

    async fn purge_results(&self, before: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut state = self.state();
        let count = state.results.len();
        state.results.retain(|_, result| result.completed_at >= before);
        Ok(count - state.results.len())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
