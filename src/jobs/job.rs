//! Job definitions.
//!
//! - `Job`: a unit of background work with retry bookkeeping
//! - `JobKind`: what the job does
//! - `JobResult`: stored outcome of a completed job
//! - `DeadLetterEntry`: a job that exhausted its attempts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::TenantId;

/// Default maximum number of attempts for a job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Data swept by cleanup jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupTarget {
    /// Record transition history.
    Transitions,
    /// Stored job results.
    JobResults,
}

impl CleanupTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupTarget::Transitions => "transitions",
            CleanupTarget::JobResults => "job_results",
        }
    }
}

/// Work carried by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    SendEmail {
        to: String,
        subject: String,
        body: String,
    },
    Notify {
        recipient: String,
        channel: String,
        message: String,
    },
    Cleanup {
        target: CleanupTarget,
        older_than_days: u32,
    },
}

impl JobKind {
    /// Stable name used in logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::SendEmail { .. } => "send_email",
            JobKind::Notify { .. } => "notify",
            JobKind::Cleanup { .. } => "cleanup",
        }
    }
}

/// A unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Owning tenant; `None` for system jobs such as cleanup.
    #[serde(default)]
    pub tenant: Option<TenantId>,
    pub kind: JobKind,
    /// Number of attempts started so far.
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may run.
    pub run_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(tenant: Option<TenantId>, kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant,
            kind,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            created_at: now,
            run_at: now,
            last_error: None,
        }
    }

    pub fn for_tenant(tenant: TenantId, kind: JobKind) -> Self {
        Self::new(Some(tenant), kind)
    }

    pub fn system(kind: JobKind) -> Self {
        Self::new(None, kind)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = run_at;
        self
    }

    /// Called before each execution attempt.
    pub fn increment_attempts(&mut self) {
        self.attempts += 1;
    }

    /// Whether another attempt is allowed after a failure.
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.run_at <= now
    }

    /// Tenant label for logs and metrics.
    pub fn tenant_label(&self) -> &str {
        self.tenant.as_ref().map(|t| t.as_str()).unwrap_or("-")
    }
}

/// Stored outcome of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    pub completed_at: DateTime<Utc>,
    pub worker_id: String,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl JobResult {
    pub fn success(
        job: &Job,
        worker_id: impl Into<String>,
        output: Option<serde_json::Value>,
        duration_ms: u64,
    ) -> Self {
        Self {
            job_id: job.id,
            output,
            completed_at: Utc::now(),
            worker_id: worker_id.into(),
            attempts: job.attempts,
            duration_ms,
        }
    }
}

/// A job parked in the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job: Job,
    pub error: String,
    pub moved_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(job: Job, error: impl Into<String>) -> Self {
        Self {
            job,
            error: error.into(),
            moved_at: Utc::now(),
        }
    }
}
