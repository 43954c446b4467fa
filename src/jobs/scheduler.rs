//! Periodic queue maintenance.
//!
//! The scheduler promotes delayed jobs whose `run_at` has passed and, on a
//! slower cadence, enqueues retention cleanup jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::job::{CleanupTarget, Job, JobKind};
use super::queue::{JobStore, QueueError};
use crate::config::JobSettings;
use crate::metrics::MetricsCollector;

const SECS_PER_DAY: u64 = 86_400;

/// Floor for tick intervals; `tokio::time::interval` panics on zero.
const MIN_TICK: Duration = Duration::from_millis(1);

/// Settings for the cleanup scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// How often delayed jobs are promoted.
    pub promote_interval: Duration,
    /// How often cleanup jobs are enqueued.
    pub cleanup_interval: Duration,
    /// Transition history older than this is purged.
    pub transition_retention_days: u32,
    /// Stored job results older than this are purged.
    pub result_retention_days: u32,
    pub max_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&JobSettings::default())
    }
}

impl From<&JobSettings> for SchedulerConfig {
    fn from(settings: &JobSettings) -> Self {
        Self {
            promote_interval: Duration::from_secs(1),
            cleanup_interval: settings.cleanup_interval(),
            transition_retention_days: settings.retention_days,
            result_retention_days: settings.result_ttl_secs.div_ceil(SECS_PER_DAY).max(1) as u32,
            max_attempts: settings.max_attempts,
        }
    }
}

impl SchedulerConfig {
    pub fn with_promote_interval(mut self, interval: Duration) -> Self {
        self.promote_interval = interval;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// One cleanup job per target.
    pub fn cleanup_jobs(&self) -> Vec<Job> {
        [
            (CleanupTarget::Transitions, self.transition_retention_days),
            (CleanupTarget::JobResults, self.result_retention_days),
        ]
        .into_iter()
        .map(|(target, older_than_days)| {
            Job::system(JobKind::Cleanup {
                target,
                older_than_days,
            })
            .with_max_attempts(self.max_attempts)
        })
        .collect()
    }
}

/// Background task promoting delayed jobs and scheduling cleanup.
pub struct CleanupScheduler {
    config: SchedulerConfig,
    store: Arc<dyn JobStore>,
    metrics: Option<MetricsCollector>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl CleanupScheduler {
    pub fn new(config: SchedulerConfig, store: Arc<dyn JobStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            store,
            metrics: None,
            shutdown_tx,
            handle: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Promotes due jobs once and refreshes the queue gauges.
    pub async fn promote(&self) -> Result<usize, QueueError> {
        promote(self.store.as_ref(), self.metrics.as_ref()).await
    }

    /// Enqueues one cleanup job per target.
    pub async fn schedule_cleanup(&self) -> Result<usize, QueueError> {
        schedule_cleanup(self.store.as_ref(), &self.config).await
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawns the scheduler loop. Calling it twice has no effect.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }

        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        let metrics = self.metrics.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        self.handle = Some(tokio::spawn(async move {
            let mut promote_tick = tokio::time::interval(config.promote_interval.max(MIN_TICK));
            promote_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut cleanup_tick = tokio::time::interval(config.cleanup_interval.max(MIN_TICK));
            cleanup_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                promote_interval_ms = config.promote_interval.as_millis() as u64,
                cleanup_interval_secs = config.cleanup_interval.as_secs(),
                "Scheduler started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = promote_tick.tick() => {
                        if let Err(e) = promote(store.as_ref(), metrics.as_ref()).await {
                            error!(error = %e, "Failed to promote delayed jobs");
                        }
                    }
                    _ = cleanup_tick.tick() => {
                        if let Err(e) = schedule_cleanup(store.as_ref(), &config).await {
                            error!(error = %e, "Failed to schedule cleanup jobs");
                        }
                    }
                }
            }

            info!("Scheduler stopped");
        }));
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        // the loop may have already exited
        let _ = self.shutdown_tx.send(());
        if let Err(e) = handle.await {
            error!(error = %e, "Scheduler task panicked");
        }
    }
}

async fn promote(store: &dyn JobStore, metrics: Option<&MetricsCollector>) -> Result<usize, QueueError> {
    let promoted = store.promote_due(Utc::now()).await?;
    if promoted > 0 {
        debug!(promoted, "Promoted delayed jobs");
    }
    if let Some(metrics) = metrics {
        metrics.set_queue_depth(&store.stats().await?);
    }
    Ok(promoted)
}

async fn schedule_cleanup(store: &dyn JobStore, config: &SchedulerConfig) -> Result<usize, QueueError> {
    let jobs = config.cleanup_jobs();
    let count = jobs.len();
    store.enqueue_batch(jobs).await?;
    info!(count, "Scheduled cleanup jobs");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::memory::MemoryJobQueue;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            promote_interval: Duration::from_millis(10),
            cleanup_interval: Duration::from_secs(3600),
            transition_retention_days: 365,
            result_retention_days: 1,
            max_attempts: 3,
        }
    }

    #[test]
    fn test_config_from_settings() {
        let settings = JobSettings {
            result_ttl_secs: 86_401,
            retention_days: 30,
            ..Default::default()
        };
        let config = SchedulerConfig::from(&settings);
        assert_eq!(config.result_retention_days, 2);
        assert_eq!(config.transition_retention_days, 30);
    }

    #[test]
    fn test_cleanup_jobs_cover_both_targets() {
        let jobs = config().cleanup_jobs();
        let targets: Vec<_> = jobs
            .iter()
            .filter_map(|job| match &job.kind {
                JobKind::Cleanup { target, older_than_days } => Some((*target, *older_than_days)),
                _ => None,
            })
            .collect();
        assert_eq!(
            targets,
            vec![(CleanupTarget::Transitions, 365), (CleanupTarget::JobResults, 1)]
        );
        assert!(jobs.iter().all(|job| job.tenant.is_none()));
    }

    #[tokio::test]
    async fn test_promote_moves_due_jobs() {
        let queue = Arc::new(MemoryJobQueue::new("test"));
        let scheduler = CleanupScheduler::new(config(), queue.clone());

        let past = Utc::now() - chrono::Duration::seconds(1);
        let job = config().cleanup_jobs().remove(0);
        queue.schedule_retry(job, past).await.unwrap();

        assert_eq!(scheduler.promote().await.unwrap(), 1);
        assert_eq!(queue.stats().await.unwrap().pending_jobs, 1);
    }

    #[tokio::test]
    async fn test_loop_schedules_cleanup_and_stops() {
        let queue = Arc::new(MemoryJobQueue::new("test"));
        let mut scheduler = CleanupScheduler::new(config(), queue.clone());

        scheduler.start();
        assert!(scheduler.is_running());
        // first interval tick fires immediately
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown().await;

        assert!(!scheduler.is_running());
        assert_eq!(queue.stats().await.unwrap().pending_jobs, 2);
    }

    #[tokio::test]
    async fn test_zero_intervals_do_not_kill_the_loop() {
        let queue = Arc::new(MemoryJobQueue::new("test"));
        let config = SchedulerConfig::default()
            .with_promote_interval(Duration::ZERO)
            .with_cleanup_interval(Duration::ZERO);
        let mut scheduler = CleanupScheduler::new(config, queue.clone());

        let past = Utc::now() - chrono::Duration::seconds(1);
        let job = SchedulerConfig::default().cleanup_jobs().remove(0);
        queue.schedule_retry(job, past).await.unwrap();

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.shutdown().await;

        // promotion only happens inside the running loop
        assert_eq!(queue.stats().await.unwrap().delayed_jobs, 0);
    }
}
