//! Backend wiring shared by the CLI commands.
//!
//! Each backend falls back to its in-memory implementation when its URL is
//! not configured, so a bare `qgov serve` runs self-contained.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use redis::aio::ConnectionManager;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{CacheMode, KeyBuilder, RedisCache, TenantCache};
use crate::config::AppConfig;
use crate::jobs::{
    CleanupScheduler, Dispatcher, JobStore, LogSender, MemoryJobQueue, NotificationSender,
    RedisJobQueue, RetryPolicy, SchedulerConfig, WebhookSender, WorkerPool, WorkerPoolConfig,
};
use crate::metrics::MetricsCollector;
use crate::service::GovernanceService;
use crate::storage::{Database, MemoryStore, RecordStore};

/// Connected backends.
pub struct Backends {
    pub store: Arc<dyn RecordStore>,
    pub cache: Arc<TenantCache>,
    pub jobs: Arc<dyn JobStore>,
    /// Set when the store is PostgreSQL.
    pub database: Option<Database>,
    /// True when the job queue lives in this process only.
    pub memory_queue: bool,
}

impl Backends {
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let (store, database): (Arc<dyn RecordStore>, Option<Database>) = match &config.database.url {
            Some(_) => {
                let database = Database::connect(&config.database)
                    .await
                    .context("failed to connect to PostgreSQL")?;
                (Arc::new(database.clone()), Some(database))
            }
            None => {
                warn!("No database url configured; records are kept in memory");
                (Arc::new(MemoryStore::new()), None)
            }
        };

        let keys = KeyBuilder::new(config.cache.namespace.clone());
        let capacity = config.cache.memory_capacity;
        let ttl = config.cache.default_ttl();

        let (cache, jobs, memory_queue): (TenantCache, Arc<dyn JobStore>, bool) = match &config.redis.url {
            Some(url) => {
                let client = redis::Client::open(url.as_str()).context("invalid redis url")?;
                let connection = ConnectionManager::new(client)
                    .await
                    .context("failed to connect to Redis")?;
                info!("Connected to Redis");

                let primary = Arc::new(RedisCache::from_connection(connection.clone()));
                let queue = RedisJobQueue::from_connection(
                    connection,
                    &config.jobs.queue_name,
                    Duration::from_secs(config.jobs.result_ttl_secs),
                );
                (
                    TenantCache::with_primary(primary, keys, capacity, ttl),
                    Arc::new(queue),
                    false,
                )
            }
            None => {
                warn!("No redis url configured; cache and job queue are in memory");
                (
                    TenantCache::memory(keys, capacity, ttl),
                    Arc::new(MemoryJobQueue::new(config.jobs.queue_name.clone())),
                    true,
                )
            }
        };

        Ok(Self {
            store,
            cache: Arc::new(cache),
            jobs,
            database,
            memory_queue,
        })
    }

    pub fn service(&self, config: &AppConfig, metrics: MetricsCollector) -> GovernanceService {
        GovernanceService::new(self.store.clone(), self.cache.clone(), self.jobs.clone())
            .with_required_approvals(config.approvals.required_approvals)
            .with_job_max_attempts(config.jobs.max_attempts)
            .with_metrics(metrics)
    }

    /// Worker pool and scheduler over these backends.
    pub fn job_runner(&self, config: &AppConfig, metrics: MetricsCollector) -> anyhow::Result<JobRunner> {
        let sender: Arc<dyn NotificationSender> = match &config.notifications.webhook_url {
            Some(url) => Arc::new(
                WebhookSender::new(url.clone(), Duration::from_secs(config.notifications.timeout_secs))
                    .context("failed to build webhook client")?,
            ),
            None => Arc::new(LogSender),
        };
        let handler = Arc::new(Dispatcher::new(sender, self.store.clone(), self.jobs.clone()));

        let pool_config = WorkerPoolConfig::new(config.jobs.workers)
            .with_poll_interval(config.jobs.poll_timeout())
            .with_job_timeout(config.jobs.job_timeout())
            .with_retry(RetryPolicy::from(&config.jobs.retry));
        let pool = WorkerPool::new(pool_config, self.jobs.clone(), handler).with_metrics(metrics.clone());
        let scheduler =
            CleanupScheduler::new(SchedulerConfig::from(&config.jobs), self.jobs.clone()).with_metrics(metrics);

        Ok(JobRunner { pool, scheduler })
    }
}

/// Workers plus the scheduler that feeds them.
pub struct JobRunner {
    pub pool: WorkerPool,
    pub scheduler: CleanupScheduler,
}

impl JobRunner {
    pub async fn start(&mut self) -> anyhow::Result<()> {
        self.pool.start().await?;
        self.scheduler.start();
        Ok(())
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.scheduler.shutdown().await;
        self.pool.shutdown().await?;
        Ok(())
    }
}

/// Re-probes a degraded cache until `stop` flips.
pub fn spawn_cache_probe(
    cache: Arc<TenantCache>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = tick.tick() => {
                    if cache.is_degraded() && cache.probe().await == CacheMode::Redis {
                        info!("Cache recovered from memory fallback");
                    }
                }
            }
        }
    })
}

/// Resolves on Ctrl-C, or on SIGTERM under unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
