//! Governance service: the operations behind the HTTP and CLI surfaces.
//!
//! Every operation is tenant-scoped. Status changes are persisted with an
//! optimistic version check, invalidate the tenant's cached record and
//! dashboard data, and enqueue notifications out of band. A failure to
//! enqueue a notification is logged and never undoes a persisted change.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::key::{DASHBOARD, RECORDS};
use crate::cache::TenantCache;
use crate::domain::{GovernanceRecord, RecordStatus, TenantId, TransitionRecord};
use crate::error::{DomainError, ScoringError, WorkflowError};
use crate::jobs::{Job, JobKind, JobStore, QueueError, DEFAULT_MAX_ATTEMPTS};
use crate::metrics::MetricsCollector;
use crate::scoring::{AuditScorer, AuditTemplate, Responses};
use crate::storage::{ApprovalWrite, AuditResult, RecordStore, StorageError};
use crate::workflow::{ApprovalRequest, Decision, WorkflowEngine};

/// Channel used for workflow notifications.
pub const NOTIFY_CHANNEL: &str = "email";

/// Errors returned by service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Record {0} not found")]
    RecordNotFound(Uuid),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Result of a status change.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub record: GovernanceRecord,
    pub transition: TransitionRecord,
    /// Approval opened because the record entered PendingApproval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRequest>,
}

/// Result of an approval decision.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub approval: ApprovalRequest,
    pub record: GovernanceRecord,
    /// Set when the decision resolved the request and moved the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<TransitionRecord>,
}

/// A record with its history and the moves available from its status.
#[derive(Debug, Clone, Serialize)]
pub struct RecordHistory {
    pub record: GovernanceRecord,
    /// Targets reachable through `transition`; approval outcomes are excluded.
    pub allowed: Vec<RecordStatus>,
    pub transitions: Vec<TransitionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_approval: Option<ApprovalRequest>,
}

/// Composes the workflow engine with storage, cache, queue and metrics.
pub struct GovernanceService {
    engine: WorkflowEngine,
    store: Arc<dyn RecordStore>,
    cache: Arc<TenantCache>,
    jobs: Arc<dyn JobStore>,
    metrics: MetricsCollector,
    required_approvals: u32,
    job_max_attempts: u32,
}

impl GovernanceService {
    pub fn new(store: Arc<dyn RecordStore>, cache: Arc<TenantCache>, jobs: Arc<dyn JobStore>) -> Self {
        Self {
            engine: WorkflowEngine::new(),
            store,
            cache,
            jobs,
            metrics: MetricsCollector::new(),
            required_approvals: 1,
            job_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Quorum for approvals opened from now on. Zero is treated as one.
    pub fn with_required_approvals(mut self, required: u32) -> Self {
        self.required_approvals = required.max(1);
        self
    }

    pub fn with_job_max_attempts(mut self, max_attempts: u32) -> Self {
        self.job_max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<TenantCache> {
        &self.cache
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Stores a new draft record and assigns its reference.
    pub async fn open_record(&self, draft: GovernanceRecord) -> Result<GovernanceRecord, ServiceError> {
        let record = self.store.open_record(draft).await?;
        self.cache.invalidate_resource(&record.tenant, DASHBOARD).await;

        info!(
            tenant = %record.tenant,
            record_id = %record.id,
            reference = %record.reference,
            kind = %record.kind,
            "Record opened"
        );
        Ok(record)
    }

    /// Returns a record, served from the tenant cache when possible.
    pub async fn get_record(&self, tenant: &TenantId, id: Uuid) -> Result<GovernanceRecord, ServiceError> {
        let key = self.cache.keys().key(tenant, RECORDS, &id.to_string());
        self.cache
            .get_or_insert_with(&key, None, || self.load_record(tenant, id))
            .await
    }

    /// Moves a record to `to`.
    ///
    /// `attributes`, when given, are merged into the record before the guards
    /// run, so a closing transition can carry its `root_cause`.
    pub async fn transition(
        &self,
        tenant: &TenantId,
        id: Uuid,
        to: RecordStatus,
        actor: &str,
        reason: &str,
        attributes: Option<serde_json::Value>,
    ) -> Result<TransitionOutcome, ServiceError> {
        let mut record = self.load_record(tenant, id).await?;
        if let Some(attributes) = attributes {
            merge_attributes(&mut record, attributes)?;
        }

        let expected_version = record.version;
        let transition = self.engine.transition(&mut record, to, actor, reason)?;

        // the request is written with the status change so PendingApproval
        // never exists without it
        let approval = if to == RecordStatus::PendingApproval {
            Some(ApprovalRequest::open(
                tenant.clone(),
                record.id,
                actor,
                self.required_approvals,
                None,
            )?)
        } else {
            None
        };
        self.store
            .save_transition(
                &record,
                &transition,
                expected_version,
                approval.as_ref().map(ApprovalWrite::insert),
            )
            .await?;

        self.after_transition(&record, &transition).await;
        if let Some(owner) = record.owner.clone() {
            self.notify(
                tenant,
                &owner,
                format!("{} moved from {} to {}", record.reference, transition.from, transition.to),
            )
            .await;
        }

        Ok(TransitionOutcome {
            record,
            transition,
            approval,
        })
    }

    /// Records an approval decision on the record's open approval request.
    ///
    /// When the decision resolves the request the record moves to Approved or
    /// Rejected and the requester is notified.
    pub async fn decide_approval(
        &self,
        tenant: &TenantId,
        record_id: Uuid,
        approver: &str,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<ApprovalOutcome, ServiceError> {
        let mut record = self.load_record(tenant, record_id).await?;
        let mut approval = self
            .store
            .get_open_approval(tenant, record_id)
            .await?
            .ok_or(WorkflowError::NoPendingApproval)?;

        let read_version = approval.version;
        let state = approval.decide(approver, decision, comment)?;

        if !approval.is_resolved() {
            // a concurrent decision on the same request answers Conflict
            self.store
                .save_approval(ApprovalWrite::update(&approval, read_version))
                .await?;
            self.metrics
                .record_approval_decision(decision.as_str(), state.as_str());
            info!(
                tenant = %tenant,
                record_id = %record_id,
                approver,
                approvals = approval.approvals(),
                required = approval.required_approvals,
                "Approval recorded"
            );
            return Ok(ApprovalOutcome {
                approval,
                record,
                transition: None,
            });
        }

        let expected_version = record.version;
        let transition = self.engine.resolve_approval(&mut record, &approval)?;
        self.store
            .save_transition(
                &record,
                &transition,
                expected_version,
                Some(ApprovalWrite::update(&approval, read_version)),
            )
            .await?;
        self.metrics
            .record_approval_decision(decision.as_str(), state.as_str());

        self.after_transition(&record, &transition).await;
        self.notify(
            tenant,
            &approval.requested_by,
            format!("{} was {} by {}", record.reference, state.as_str(), approver),
        )
        .await;

        Ok(ApprovalOutcome {
            approval,
            record,
            transition: Some(transition),
        })
    }

    pub async fn history(&self, tenant: &TenantId, id: Uuid) -> Result<RecordHistory, ServiceError> {
        let record = self.get_record(tenant, id).await?;
        let transitions = self.store.list_transitions(tenant, id).await?;
        let pending_approval = if record.status == RecordStatus::PendingApproval {
            self.store.get_open_approval(tenant, id).await?
        } else {
            None
        };

        let allowed = self
            .engine
            .allowed_transitions(record.kind, record.status)
            .into_iter()
            .filter(|s| !matches!(s, RecordStatus::Approved | RecordStatus::Rejected))
            .collect();

        Ok(RecordHistory {
            record,
            allowed,
            transitions,
            pending_approval,
        })
    }

    /// Scores an audit run and stores the result.
    pub async fn score_audit(
        &self,
        tenant: &TenantId,
        template: &AuditTemplate,
        responses: &Responses,
        strict: bool,
        record_id: Option<Uuid>,
        actor: &str,
    ) -> Result<AuditResult, ServiceError> {
        if let Some(id) = record_id {
            self.load_record(tenant, id).await?;
        }

        let report = AuditScorer::new().with_strict(strict).score(template, responses)?;
        self.metrics
            .record_audit_score(report.outcome.as_str(), report.percentage);

        let result = AuditResult::new(tenant.clone(), record_id, report, actor);
        self.store.save_audit_result(&result).await?;
        self.cache.invalidate_resource(tenant, DASHBOARD).await;

        info!(
            tenant = %tenant,
            template = %result.report.template_id,
            outcome = result.report.outcome.as_str(),
            percentage = result.report.percentage,
            "Audit scored"
        );
        Ok(result)
    }

    async fn load_record(&self, tenant: &TenantId, id: Uuid) -> Result<GovernanceRecord, ServiceError> {
        self.store
            .get_record(tenant, id)
            .await?
            .ok_or(ServiceError::RecordNotFound(id))
    }

    async fn after_transition(&self, record: &GovernanceRecord, transition: &TransitionRecord) {
        self.cache.invalidate_after_transition(&record.tenant).await;
        self.metrics.record_transition(
            record.kind.as_str(),
            transition.from.as_str(),
            transition.to.as_str(),
        );
        info!(
            tenant = %record.tenant,
            record_id = %record.id,
            reference = %record.reference,
            from = %transition.from,
            to = %transition.to,
            actor = %transition.actor,
            version = record.version,
            "Transition saved"
        );
    }

    async fn notify(&self, tenant: &TenantId, recipient: &str, message: String) {
        let job = Job::for_tenant(
            tenant.clone(),
            JobKind::Notify {
                recipient: recipient.to_string(),
                channel: NOTIFY_CHANNEL.to_string(),
                message,
            },
        )
        .with_max_attempts(self.job_max_attempts);

        let job_id = job.id;
        if let Err(e) = self.jobs.enqueue(job).await {
            error!(tenant = %tenant, job_id = %job_id, error = %e, "Failed to enqueue notification");
        }
    }
}

fn merge_attributes(record: &mut GovernanceRecord, attributes: serde_json::Value) -> Result<(), DomainError> {
    let serde_json::Value::Object(updates) = attributes else {
        return Err(DomainError::AttributesNotObject);
    };
    match record.attributes.as_object_mut() {
        Some(current) => current.extend(updates),
        None => {
            warn!(record_id = %record.id, "Replacing non-object attributes");
            record.attributes = serde_json::Value::Object(updates);
        }
    }
    Ok(())
}
