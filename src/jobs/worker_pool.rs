//! Worker pool for processing background jobs.
//!
//! Each worker runs as an independent task that pulls jobs from the shared
//! [`JobStore`], runs them through a [`JobHandler`] under a timeout and
//! decides between completion, a delayed retry and the dead-letter queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::job::{Job, JobResult};
use super::queue::{JobStore, QueueError};
use super::retry::RetryPolicy;
use crate::metrics::MetricsCollector;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Pool is already running")]
    AlreadyRunning,

    #[error("Pool is not running")]
    NotRunning,

    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Failure reported by a job handler.
#[derive(Debug, Error)]
pub enum JobError {
    /// Worth retrying, e.g. a remote endpoint was unavailable.
    #[error("{0}")]
    Retryable(String),

    /// Retrying cannot help; the job goes straight to the dead-letter queue.
    #[error("{0}")]
    Permanent(String),

    #[error("Job timed out after {0:?}")]
    Timeout(Duration),
}

impl JobError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, JobError::Permanent(_))
    }
}

/// Successful handler result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutcome {
    /// Optional details stored with the job result.
    pub output: Option<serde_json::Value>,
}

impl JobOutcome {
    pub fn with_output(output: serde_json::Value) -> Self {
        Self {
            output: Some(output),
        }
    }
}

/// Executes jobs of every kind.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<JobOutcome, JobError>;
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub num_workers: usize,
    /// Blocking dequeue timeout; also the pause after a queue error.
    pub poll_interval: Duration,
    /// Maximum time allowed for processing a single job.
    pub job_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub num_workers: usize,
    pub active_workers: usize,
    pub jobs_completed: u64,
    /// Failed attempts, whether retried or dead-lettered.
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub jobs_dead_lettered: u64,
    pub average_job_duration: Duration,
}

impl PoolStats {
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

#[derive(Default)]
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_dead_lettered: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn record_completion(&self, duration: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);

        let total_jobs = completed + failed;
        let average_job_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            jobs_completed: completed,
            jobs_failed: failed,
            jobs_retried: self.jobs_retried.load(Ordering::SeqCst),
            jobs_dead_lettered: self.jobs_dead_lettered.load(Ordering::SeqCst),
            average_job_duration,
        }
    }
}

/// Pool of workers sharing one job store and one handler.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    metrics: Option<MetricsCollector>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        store: Arc<dyn JobStore>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            store,
            handler,
            metrics: None,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::default()),
            is_running: AtomicBool::new(false),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Recovers interrupted jobs and spawns the workers.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        match self.store.recover_processing().await {
            Ok(recovered) if recovered > 0 => {
                info!(recovered, "Recovered jobs from processing queue");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to recover processing jobs"),
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                store: Arc::clone(&self.store),
                handler: Arc::clone(&self.handler),
                metrics: self.metrics.clone(),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                job_timeout: self.config.job_timeout,
                retry: self.config.retry.clone(),
                stats: Arc::clone(&self.stats),
            };

            self.worker_handles.push(tokio::spawn(worker.run()));
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, "Worker pool started");
        Ok(())
    }

    /// Signals every worker and waits for in-flight jobs to finish.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await;
        self.is_running.store(false, Ordering::SeqCst);
        match result {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

/// A single worker loop.
struct Worker {
    id: String,
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    metrics: Option<MetricsCollector>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    job_timeout: Duration,
    retry: RetryPolicy,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            let next = tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                next = self.store.dequeue(self.poll_interval) => next,
            };

            match next {
                Ok(Some(job)) => self.process_job(job).await,
                Ok(None) => debug!(worker_id = %self.id, "No jobs available"),
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to dequeue job");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    async fn process_job(&self, mut job: Job) {
        let start_time = Instant::now();
        job.increment_attempts();

        info!(
            worker_id = %self.id,
            job_id = %job.id,
            kind = job.kind.name(),
            tenant = job.tenant_label(),
            attempt = job.attempts,
            "Processing job"
        );

        let active = self.stats.active_workers.fetch_add(1, Ordering::SeqCst) + 1;
        self.report_active(active);
        let result = match tokio::time::timeout(self.job_timeout, self.handler.handle(&job)).await {
            Ok(result) => result,
            Err(_) => Err(JobError::Timeout(self.job_timeout)),
        };
        let active = self.stats.active_workers.fetch_sub(1, Ordering::SeqCst) - 1;
        self.report_active(active);

        let duration = start_time.elapsed();
        let duration_ms = duration.as_millis() as u64;

        match result {
            Ok(outcome) => {
                self.stats.record_completion(duration);
                self.observe(&job, "completed", duration);
                let job_result = JobResult::success(&job, &self.id, outcome.output, duration_ms);
                if let Err(e) = self.store.complete(&job, job_result).await {
                    error!(worker_id = %self.id, job_id = %job.id, error = %e, "Failed to mark job complete");
                } else {
                    info!(worker_id = %self.id, job_id = %job.id, duration_ms, "Job completed successfully");
                }
            }
            Err(e) => {
                self.stats.record_failure(duration);
                job.last_error = Some(e.to_string());

                if !e.is_permanent() && job.should_retry() {
                    let delay = self.retry.delay_for(job.attempts);
                    let run_at = Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                    warn!(
                        worker_id = %self.id,
                        job_id = %job.id,
                        error = %e,
                        remaining_attempts = job.remaining_attempts(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Job failed, scheduling retry"
                    );
                    self.stats.jobs_retried.fetch_add(1, Ordering::SeqCst);
                    self.observe(&job, "retried", duration);

                    let job_id = job.id;
                    if let Err(retry_err) = self.store.schedule_retry(job, run_at).await {
                        error!(worker_id = %self.id, job_id = %job_id, error = %retry_err, "Failed to schedule retry");
                    }
                } else {
                    error!(
                        worker_id = %self.id,
                        job_id = %job.id,
                        error = %e,
                        attempts = job.attempts,
                        "Job failed, moving to dead letter queue"
                    );
                    self.stats.jobs_dead_lettered.fetch_add(1, Ordering::SeqCst);
                    self.observe(&job, "dead_lettered", duration);

                    let job_id = job.id;
                    if let Err(dlq_err) = self.store.dead_letter(job, &e.to_string()).await {
                        error!(worker_id = %self.id, job_id = %job_id, error = %dlq_err, "Failed to move job to dead letter queue");
                    }
                }
            }
        }
    }

    fn report_active(&self, active: u64) {
        if let Some(metrics) = &self.metrics {
            metrics.set_active_workers(active as usize);
        }
    }

    fn observe(&self, job: &Job, outcome: &str, duration: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics.record_job(job.kind.name(), outcome, duration);
        }
    }
}
