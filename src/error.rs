//! Error types for governance operations.
//!
//! Defines the error types for the domain-level subsystems:
//! - Tenant and record validation
//! - Workflow transitions and approvals
//! - Audit template validation and scoring
//!
//! Infrastructure errors (storage, cache, queue, configuration, HTTP) live
//! next to the code that raises them.

use thiserror::Error;

/// Errors raised while validating domain values.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invalid tenant id '{0}': expected a lowercase slug of 2-63 characters")]
    InvalidTenant(String),

    #[error("Unknown record kind '{0}'")]
    UnknownKind(String),

    #[error("Unknown record status '{0}'")]
    UnknownStatus(String),

    #[error("Unknown severity '{0}'")]
    UnknownSeverity(String),

    #[error("Invalid reference '{0}'")]
    InvalidReference(String),

    #[error("Record attributes must be a JSON object")]
    AttributesNotObject,

    #[error("Title must not be empty")]
    EmptyTitle,
}

/// Errors raised by the workflow engine and the approval engine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Invalid transition for {kind} from '{from}' to '{to}'")]
    InvalidTransition {
        kind: String,
        from: String,
        to: String,
    },

    #[error("Transition guard failed: {0}")]
    GuardFailed(String),

    #[error("Status '{0}' can only be reached through an approval decision")]
    ApprovalRequired(String),

    #[error("Record is not awaiting approval")]
    NoPendingApproval,

    #[error("Approver '{0}' requested this approval and cannot decide it")]
    SelfApproval(String),

    #[error("Approver '{0}' is not eligible for this approval")]
    NotEligible(String),

    #[error("Approver '{0}' has already decided this approval")]
    DuplicateDecision(String),

    #[error("Approval request is already resolved")]
    AlreadyResolved,

    #[error("Required approvals must be at least 1")]
    InvalidQuorum,
}

/// Errors raised while validating audit templates or scoring audit runs.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Response references unknown question '{0}'")]
    UnknownQuestion(String),

    #[error("Missing response for required question(s): {}", .0.join(", "))]
    MissingResponse(Vec<String>),

    #[error("Invalid response for question '{question}': {reason}")]
    InvalidResponse { question: String, reason: String },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
