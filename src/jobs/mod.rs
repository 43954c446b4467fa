//! Background jobs with retries and a dead-letter queue.
//!
//! - **Job**: unit of work (email, notification, cleanup) with retry bookkeeping
//! - **JobStore**: durable queue; Redis in production, memory for tests and local runs
//! - **WorkerPool**: workers that run jobs through a [`JobHandler`] under a timeout
//! - **RetryPolicy**: exponential backoff with jitter between attempts
//! - **CleanupScheduler**: promotes delayed jobs and enqueues retention cleanup
//!
//! # Architecture
//!
//! ```text
//!   GovernanceService ──enqueue──> JobStore ──dequeue──> WorkerPool ──> Dispatcher
//!                                    ▲   │                   │
//!            CleanupScheduler ──promote  └── dead letter <───┘ (attempts exhausted)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use quality_governance::jobs::{Dispatcher, LogSender, MemoryJobQueue, WorkerPool, WorkerPoolConfig};
//!
//! let queue = Arc::new(MemoryJobQueue::new("qgov:jobs"));
//! let handler = Arc::new(Dispatcher::new(Arc::new(LogSender), store, queue.clone()));
//! let mut pool = WorkerPool::new(WorkerPoolConfig::new(4), queue, handler);
//! pool.start().await?;
//! // ...
//! pool.shutdown().await?;
//! ```

pub mod handlers;
pub mod job;
pub mod memory;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod worker_pool;

pub use handlers::{Dispatcher, LogSender, Notification, NotificationSender, WebhookSender};
pub use job::{CleanupTarget, DeadLetterEntry, Job, JobKind, JobResult, DEFAULT_MAX_ATTEMPTS};
pub use memory::MemoryJobQueue;
pub use queue::{JobStore, QueueError, QueueStats, RedisJobQueue};
pub use retry::RetryPolicy;
pub use scheduler::{CleanupScheduler, SchedulerConfig};
pub use worker_pool::{
    JobError, JobHandler, JobOutcome, PoolError, PoolStats, WorkerPool, WorkerPoolConfig,
};
