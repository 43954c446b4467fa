//! Persistent storage for governance records.
//!
//! # Overview
//!
//! - **RecordStore**: the storage seam used by the service layer
//! - **Database**: PostgreSQL implementation (sqlx)
//! - **MemoryStore**: in-process implementation for tests and local runs
//! - **Migrations**: schema management and versioning
//!
//! Every read and write is scoped by tenant. A record id looked up under the
//! wrong tenant behaves exactly like a missing record.
//!
//! # Usage
//!
//! ```rust,ignore
//! use quality_governance::storage::{Database, RecordStore};
//!
//! let db = Database::connect(&config.database).await?;
//! db.run_migrations().await?;
//!
//! let record = db.open_record(GovernanceRecord::draft(tenant, RecordKind::Capa, "Seal leak")?).await?;
//! assert_eq!(record.reference, "CAPA-2026-00001");
//! ```

pub mod database;
pub mod memory;
pub mod migrations;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{GovernanceRecord, TenantId, TransitionRecord};
use crate::error::DomainError;
use crate::scoring::ScoreReport;
use crate::workflow::ApprovalRequest;

pub use database::Database;
pub use memory::MemoryStore;
pub use migrations::{AppliedMigration, MigrationError, MigrationRunner};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    /// The row changed since it was read.
    #[error("Version conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    /// A stored value no longer parses into a domain type.
    #[error("Corrupt row: {0}")]
    Corrupt(#[from] DomainError),
}

/// A persisted audit score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub id: Uuid,
    pub tenant: TenantId,
    /// Audit record the run belongs to, if any.
    #[serde(default)]
    pub record_id: Option<Uuid>,
    pub report: ScoreReport,
    pub scored_by: String,
    pub scored_at: DateTime<Utc>,
}

impl AuditResult {
    pub fn new(
        tenant: TenantId,
        record_id: Option<Uuid>,
        report: ScoreReport,
        scored_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant,
            record_id,
            report,
            scored_by: scored_by.into(),
            scored_at: Utc::now(),
        }
    }
}

/// Approval request write with its optimistic-concurrency expectation.
#[derive(Debug, Clone, Copy)]
pub struct ApprovalWrite<'a> {
    pub request: &'a ApprovalRequest,
    /// Stored version the update applies to; `None` inserts a new request.
    pub expected_version: Option<i64>,
}

impl<'a> ApprovalWrite<'a> {
    pub fn insert(request: &'a ApprovalRequest) -> Self {
        Self {
            request,
            expected_version: None,
        }
    }

    pub fn update(request: &'a ApprovalRequest, expected_version: i64) -> Self {
        Self {
            request,
            expected_version: Some(expected_version),
        }
    }

    fn conflict(&self) -> StorageError {
        match self.expected_version {
            Some(version) => StorageError::Conflict(format!(
                "approval request {} changed since version {}",
                self.request.id, version
            )),
            None => StorageError::Conflict(format!(
                "approval request {} already exists",
                self.request.id
            )),
        }
    }
}

/// Tenant-scoped persistence for records, history, approvals and audit results.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), StorageError>;

    /// Allocates the next reference for the record's (tenant, kind, year) and
    /// inserts it. Returns the stored record.
    async fn open_record(&self, record: GovernanceRecord) -> Result<GovernanceRecord, StorageError>;

    async fn get_record(
        &self,
        tenant: &TenantId,
        id: Uuid,
    ) -> Result<Option<GovernanceRecord>, StorageError>;

    /// Persists a status change, its history entry and, when given, the
    /// approval request it opens or resolves, all in one unit.
    ///
    /// The update only applies while the stored record version still equals
    /// `expected_version` and the approval write passes its own version
    /// check; otherwise `StorageError::Conflict` is returned and nothing is
    /// written.
    async fn save_transition(
        &self,
        record: &GovernanceRecord,
        transition: &TransitionRecord,
        expected_version: i64,
        approval: Option<ApprovalWrite<'_>>,
    ) -> Result<(), StorageError>;

    /// History of a record, oldest first.
    async fn list_transitions(
        &self,
        tenant: &TenantId,
        record_id: Uuid,
    ) -> Result<Vec<TransitionRecord>, StorageError>;

    /// Inserts a new approval request or updates a stored one under its
    /// version check.
    async fn save_approval(&self, write: ApprovalWrite<'_>) -> Result<(), StorageError>;

    /// The unresolved approval request of a record, if any.
    async fn get_open_approval(
        &self,
        tenant: &TenantId,
        record_id: Uuid,
    ) -> Result<Option<ApprovalRequest>, StorageError>;

    async fn save_audit_result(&self, result: &AuditResult) -> Result<(), StorageError>;

    /// Deletes history entries older than `before` across all tenants.
    async fn purge_transitions_before(&self, before: DateTime<Utc>) -> Result<u64, StorageError>;
}
