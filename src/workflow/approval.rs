//! Approval requests for records that sit in PendingApproval.
//!
//! A request collects one decision per approver. Any rejection resolves the
//! request as rejected; it resolves as approved once the number of approvals
//! reaches the quorum. Requesters may never decide their own request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::TenantId;
use crate::error::WorkflowError;

/// Outcome chosen by a single approver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        }
    }
}

/// State of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::Pending => "pending",
            ApprovalState::Approved => "approved",
            ApprovalState::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approver: String,
    pub decision: Decision,
    #[serde(default)]
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Approval request attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub tenant: TenantId,
    pub record_id: Uuid,
    pub requested_by: String,
    pub required_approvals: u32,
    /// When set, only these approvers may decide.
    #[serde(default)]
    pub eligible_approvers: Option<Vec<String>>,
    #[serde(default)]
    pub decisions: Vec<ApprovalDecision>,
    pub state: ApprovalState,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Incremented by every recorded decision; stores update only the
    /// version they read.
    #[serde(default = "initial_version")]
    pub version: i64,
}

fn initial_version() -> i64 {
    1
}

impl ApprovalRequest {
    /// Opens a new pending request.
    pub fn open(
        tenant: TenantId,
        record_id: Uuid,
        requested_by: impl Into<String>,
        required_approvals: u32,
        eligible_approvers: Option<Vec<String>>,
    ) -> Result<Self, WorkflowError> {
        if required_approvals == 0 {
            return Err(WorkflowError::InvalidQuorum);
        }
        Ok(Self {
            id: Uuid::new_v4(),
            tenant,
            record_id,
            requested_by: requested_by.into(),
            required_approvals,
            eligible_approvers,
            decisions: Vec::new(),
            state: ApprovalState::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            version: initial_version(),
        })
    }

    /// Number of approve decisions recorded so far.
    pub fn approvals(&self) -> u32 {
        self.decisions
            .iter()
            .filter(|d| d.decision == Decision::Approve)
            .count() as u32
    }

    pub fn is_resolved(&self) -> bool {
        self.state != ApprovalState::Pending
    }

    /// Records a decision and returns the resulting state.
    pub fn decide(
        &mut self,
        approver: &str,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<ApprovalState, WorkflowError> {
        if self.is_resolved() {
            return Err(WorkflowError::AlreadyResolved);
        }
        if approver == self.requested_by {
            return Err(WorkflowError::SelfApproval(approver.to_string()));
        }
        if let Some(eligible) = &self.eligible_approvers {
            if !eligible.iter().any(|a| a == approver) {
                return Err(WorkflowError::NotEligible(approver.to_string()));
            }
        }
        if self.decisions.iter().any(|d| d.approver == approver) {
            return Err(WorkflowError::DuplicateDecision(approver.to_string()));
        }

        let now = Utc::now();
        self.decisions.push(ApprovalDecision {
            approver: approver.to_string(),
            decision,
            comment: comment.filter(|c| !c.trim().is_empty()),
            decided_at: now,
        });

        self.state = match decision {
            Decision::Reject => ApprovalState::Rejected,
            Decision::Approve if self.approvals() >= self.required_approvals => {
                ApprovalState::Approved
            }
            Decision::Approve => ApprovalState::Pending,
        };
        if self.is_resolved() {
            self.resolved_at = Some(now);
        }
        self.version += 1;

        Ok(self.state)
    }
}
