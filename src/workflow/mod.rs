//! Record workflow: status state machine and approvals.
//!
//! - **WorkflowEngine**: per-kind transition tables and transition guards
//! - **ApprovalRequest**: quorum-based approval of records in PendingApproval
//!
//! # Example
//!
//! ```rust,ignore
//! use quality_governance::workflow::{WorkflowEngine, ApprovalRequest, Decision};
//!
//! let engine = WorkflowEngine::new();
//! engine.transition(&mut capa, RecordStatus::PendingApproval, "alice", "ready")?;
//!
//! let mut approval = ApprovalRequest::open(tenant, capa.id, "alice", 1, None)?;
//! approval.decide("qa-lead", Decision::Approve, None)?;
//! engine.resolve_approval(&mut capa, &approval)?;
//! ```

pub mod approval;
pub mod engine;

pub use approval::{ApprovalDecision, ApprovalRequest, ApprovalState, Decision};
pub use engine::WorkflowEngine;
