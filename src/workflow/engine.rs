use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::{GovernanceRecord, RecordKind, RecordStatus, TransitionRecord};
use crate::error::WorkflowError;

use super::approval::{ApprovalRequest, ApprovalState, Decision};

use crate::domain::RecordStatus::*;

/// Manages record status transitions.
///
/// Holds one transition table per record kind and enforces the guards
/// attached to specific target statuses. Approved and Rejected can only be
/// entered through [`WorkflowEngine::resolve_approval`].
pub struct WorkflowEngine {
    valid_transitions: HashMap<(RecordKind, RecordStatus), Vec<RecordStatus>>,
}

impl WorkflowEngine {
    /// Create an engine with the standard transition tables.
    pub fn new() -> Self {
        let mut valid_transitions = HashMap::new();

        // Incidents and complaints share the investigate-then-review shape;
        // a complaint may be closed straight from Open.
        insert_table(
            &mut valid_transitions,
            RecordKind::Incident,
            vec![
                (Draft, vec![Open, Cancelled]),
                (Open, vec![InProgress, Cancelled]),
                (InProgress, vec![UnderReview]),
                (UnderReview, vec![InProgress, Closed]),
            ],
        );
        insert_table(
            &mut valid_transitions,
            RecordKind::Complaint,
            vec![
                (Draft, vec![Open, Cancelled]),
                (Open, vec![InProgress, Closed]),
                (InProgress, vec![UnderReview]),
                (UnderReview, vec![InProgress, Closed]),
            ],
        );
        insert_table(
            &mut valid_transitions,
            RecordKind::Risk,
            vec![
                (Draft, vec![Open, Cancelled]),
                (Open, vec![UnderReview, Closed]),
                (UnderReview, vec![Open, Closed]),
            ],
        );
        insert_table(
            &mut valid_transitions,
            RecordKind::Investigation,
            vec![
                (Draft, vec![InProgress, Cancelled]),
                (InProgress, vec![UnderReview]),
                (UnderReview, vec![InProgress, Closed]),
            ],
        );
        insert_table(
            &mut valid_transitions,
            RecordKind::Capa,
            vec![
                (Draft, vec![Open, Cancelled]),
                (Open, vec![InProgress, Cancelled]),
                (InProgress, vec![PendingApproval]),
                (PendingApproval, vec![Approved, Rejected]),
                (Rejected, vec![InProgress]),
                (Approved, vec![Implemented]),
                (Implemented, vec![Verified, InProgress]),
                (Verified, vec![Closed]),
            ],
        );
        insert_table(
            &mut valid_transitions,
            RecordKind::Audit,
            vec![
                (Draft, vec![Open, Cancelled]),
                (Open, vec![InProgress]),
                (InProgress, vec![UnderReview]),
                (UnderReview, vec![InProgress, Closed]),
            ],
        );
        for kind in [RecordKind::Policy, RecordKind::Document] {
            insert_table(
                &mut valid_transitions,
                kind,
                vec![
                    (Draft, vec![UnderReview, Cancelled]),
                    (UnderReview, vec![Draft, PendingApproval]),
                    (PendingApproval, vec![Approved, Rejected]),
                    (Rejected, vec![Draft]),
                    (Approved, vec![Closed]),
                ],
            );
        }

        Self { valid_transitions }
    }

    /// Check if a transition between two statuses is allowed for a kind.
    pub fn can_transition(&self, kind: RecordKind, from: RecordStatus, to: RecordStatus) -> bool {
        self.valid_transitions
            .get(&(kind, from))
            .map(|targets| targets.contains(&to))
            .unwrap_or(false)
    }

    /// Targets reachable from `status`, in table order.
    pub fn allowed_transitions(&self, kind: RecordKind, status: RecordStatus) -> Vec<RecordStatus> {
        self.valid_transitions
            .get(&(kind, status))
            .cloned()
            .unwrap_or_default()
    }

    /// Attempt to move a record to a new status.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The transition is not in the kind's table
    /// - The target is Approved/Rejected (approval decisions only)
    /// - A guard on the target status is not satisfied
    pub fn transition(
        &self,
        record: &mut GovernanceRecord,
        to: RecordStatus,
        actor: &str,
        reason: &str,
    ) -> Result<TransitionRecord, WorkflowError> {
        self.check_edge(record, to)?;

        if matches!(to, Approved | Rejected) {
            return Err(WorkflowError::ApprovalRequired(to.to_string()));
        }

        self.check_guards(record, to, reason)?;
        Ok(Self::apply(record, to, actor, reason))
    }

    /// Moves a record out of PendingApproval once its approval resolved.
    pub fn resolve_approval(
        &self,
        record: &mut GovernanceRecord,
        request: &ApprovalRequest,
    ) -> Result<TransitionRecord, WorkflowError> {
        let (to, decision) = match request.state {
            ApprovalState::Approved => (Approved, request.decisions.last()),
            ApprovalState::Rejected => (
                Rejected,
                request
                    .decisions
                    .iter()
                    .find(|d| d.decision == Decision::Reject),
            ),
            ApprovalState::Pending => return Err(WorkflowError::NoPendingApproval),
        };

        if record.status != PendingApproval {
            return Err(WorkflowError::NoPendingApproval);
        }
        self.check_edge(record, to)?;

        let (actor, reason) = decision
            .map(|d| (d.approver.as_str(), d.comment.as_deref().unwrap_or("")))
            .unwrap_or(("system", ""));
        Ok(Self::apply(record, to, actor, reason))
    }

    fn check_edge(&self, record: &GovernanceRecord, to: RecordStatus) -> Result<(), WorkflowError> {
        if record.status.is_terminal() || !self.can_transition(record.kind, record.status, to) {
            return Err(WorkflowError::InvalidTransition {
                kind: record.kind.to_string(),
                from: record.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    fn check_guards(
        &self,
        record: &GovernanceRecord,
        to: RecordStatus,
        reason: &str,
    ) -> Result<(), WorkflowError> {
        match (record.kind, to) {
            (_, Cancelled) if reason.trim().is_empty() => Err(WorkflowError::GuardFailed(
                "a reason is required to cancel a record".to_string(),
            )),
            (RecordKind::Incident | RecordKind::Complaint | RecordKind::Investigation, Closed)
                if record.text_attribute("root_cause").is_none() =>
            {
                Err(WorkflowError::GuardFailed(format!(
                    "{} {} cannot be closed without a root_cause",
                    record.kind, record.reference
                )))
            }
            (RecordKind::Risk, Closed) if record.number_attribute("residual_score").is_none() => {
                Err(WorkflowError::GuardFailed(format!(
                    "risk {} cannot be closed without a residual_score",
                    record.reference
                )))
            }
            (RecordKind::Capa, Verified)
                if record.text_attribute("effectiveness_check").is_none() =>
            {
                Err(WorkflowError::GuardFailed(format!(
                    "CAPA {} cannot be verified without an effectiveness_check",
                    record.reference
                )))
            }
            _ => Ok(()),
        }
    }

    fn apply(
        record: &mut GovernanceRecord,
        to: RecordStatus,
        actor: &str,
        reason: &str,
    ) -> TransitionRecord {
        let from = record.status;
        let now = Utc::now();

        record.status = to;
        record.version += 1;
        record.updated_at = now;

        tracing::debug!(
            record_id = %record.id,
            tenant = %record.tenant,
            kind = %record.kind,
            from = %from,
            to = %to,
            actor = actor,
            "Record transitioned"
        );

        TransitionRecord {
            id: Uuid::new_v4(),
            record_id: record.id,
            tenant: record.tenant.clone(),
            from,
            to,
            actor: actor.to_string(),
            reason: reason.to_string(),
            occurred_at: now,
        }
    }
}

fn insert_table(
    transitions: &mut HashMap<(RecordKind, RecordStatus), Vec<RecordStatus>>,
    kind: RecordKind,
    edges: Vec<(RecordStatus, Vec<RecordStatus>)>,
) {
    for (from, targets) in edges {
        transitions.insert((kind, from), targets);
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TenantId;

    fn record(kind: RecordKind, status: RecordStatus) -> GovernanceRecord {
        let mut record =
            GovernanceRecord::draft(TenantId::parse("acme").unwrap(), kind, "Test record").unwrap();
        record.reference = format!("{}-2026-00001", kind.reference_prefix());
        record.status = status;
        record
    }

    #[test]
    fn test_capa_transitions() {
        let engine = WorkflowEngine::new();
        let k = RecordKind::Capa;

        assert!(engine.can_transition(k, Draft, Open));
        assert!(engine.can_transition(k, InProgress, PendingApproval));
        assert!(engine.can_transition(k, Implemented, InProgress));
        assert!(!engine.can_transition(k, Draft, Closed));
        assert!(!engine.can_transition(k, Open, Approved));
        assert!(!engine.can_transition(k, Verified, Implemented));
    }

    /// Edge list per kind, written out independently of the engine tables.
    fn expected_edges(kind: RecordKind) -> Vec<(RecordStatus, RecordStatus)> {
        match kind {
            RecordKind::Incident => vec![
                (Draft, Open),
                (Draft, Cancelled),
                (Open, InProgress),
                (Open, Cancelled),
                (InProgress, UnderReview),
                (UnderReview, InProgress),
                (UnderReview, Closed),
            ],
            RecordKind::Risk => vec![
                (Draft, Open),
                (Draft, Cancelled),
                (Open, UnderReview),
                (Open, Closed),
                (UnderReview, Open),
                (UnderReview, Closed),
            ],
            RecordKind::Complaint => vec![
                (Draft, Open),
                (Draft, Cancelled),
                (Open, InProgress),
                (Open, Closed),
                (InProgress, UnderReview),
                (UnderReview, InProgress),
                (UnderReview, Closed),
            ],
            RecordKind::Investigation => vec![
                (Draft, InProgress),
                (Draft, Cancelled),
                (InProgress, UnderReview),
                (UnderReview, InProgress),
                (UnderReview, Closed),
            ],
            RecordKind::Capa => vec![
                (Draft, Open),
                (Draft, Cancelled),
                (Open, InProgress),
                (Open, Cancelled),
                (InProgress, PendingApproval),
                (PendingApproval, Approved),
                (PendingApproval, Rejected),
                (Rejected, InProgress),
                (Approved, Implemented),
                (Implemented, Verified),
                (Implemented, InProgress),
                (Verified, Closed),
            ],
            RecordKind::Audit => vec![
                (Draft, Open),
                (Draft, Cancelled),
                (Open, InProgress),
                (InProgress, UnderReview),
                (UnderReview, InProgress),
                (UnderReview, Closed),
            ],
            RecordKind::Policy | RecordKind::Document => vec![
                (Draft, UnderReview),
                (Draft, Cancelled),
                (UnderReview, Draft),
                (UnderReview, PendingApproval),
                (PendingApproval, Approved),
                (PendingApproval, Rejected),
                (Rejected, Draft),
                (Approved, Closed),
            ],
        }
    }

    #[test]
    fn test_transition_tables_are_exact() {
        let engine = WorkflowEngine::new();
        for kind in RecordKind::ALL {
            let edges = expected_edges(kind);
            for from in RecordStatus::ALL {
                for to in RecordStatus::ALL {
                    assert_eq!(
                        engine.can_transition(kind, from, to),
                        edges.contains(&(from, to)),
                        "{kind}: {from} -> {to}"
                    );
                }

                let expected: Vec<RecordStatus> = edges
                    .iter()
                    .filter(|(f, _)| *f == from)
                    .map(|(_, t)| *t)
                    .collect();
                assert_eq!(engine.allowed_transitions(kind, from), expected, "{kind}: from {from}");
            }
        }
    }

    #[test]
    fn test_terminal_statuses_have_no_exits() {
        let engine = WorkflowEngine::new();
        for kind in RecordKind::ALL {
            for from in [Closed, Cancelled] {
                assert!(engine.allowed_transitions(kind, from).is_empty());
                for to in RecordStatus::ALL {
                    assert!(!engine.can_transition(kind, from, to));
                }
            }
        }
    }

    #[test]
    fn test_every_kind_can_leave_draft() {
        let engine = WorkflowEngine::new();
        for kind in RecordKind::ALL {
            assert!(
                !engine.allowed_transitions(kind, Draft).is_empty(),
                "{kind} is stuck in draft"
            );
        }
    }

    #[test]
    fn test_transition_updates_record() {
        let engine = WorkflowEngine::new();
        let mut rec = record(RecordKind::Incident, Draft);

        let entry = engine
            .transition(&mut rec, Open, "alice", "reported on site")
            .unwrap();

        assert_eq!(rec.status, Open);
        assert_eq!(rec.version, 2);
        assert_eq!(entry.from, Draft);
        assert_eq!(entry.to, Open);
        assert_eq!(entry.actor, "alice");
        assert_eq!(entry.record_id, rec.id);
    }

    #[test]
    fn test_invalid_transition_leaves_record_untouched() {
        let engine = WorkflowEngine::new();
        let mut rec = record(RecordKind::Incident, Draft);

        let err = engine.transition(&mut rec, Closed, "alice", "").unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
        assert_eq!(rec.status, Draft);
        assert_eq!(rec.version, 1);
    }

    #[test]
    fn test_cancel_requires_reason() {
        let engine = WorkflowEngine::new();
        let mut rec = record(RecordKind::Risk, Draft);

        let err = engine.transition(&mut rec, Cancelled, "bob", "  ").unwrap_err();
        assert!(matches!(err, WorkflowError::GuardFailed(_)));

        engine
            .transition(&mut rec, Cancelled, "bob", "duplicate of RSK-2026-00002")
            .unwrap();
        assert_eq!(rec.status, Cancelled);
    }

    #[test]
    fn test_close_incident_requires_root_cause() {
        let engine = WorkflowEngine::new();
        let mut rec = record(RecordKind::Incident, UnderReview);

        let err = engine.transition(&mut rec, Closed, "carol", "done").unwrap_err();
        assert!(err.to_string().contains("root_cause"));

        rec.attributes = serde_json::json!({"root_cause": "worn seal"});
        engine.transition(&mut rec, Closed, "carol", "done").unwrap();
        assert_eq!(rec.status, Closed);
    }

    #[test]
    fn test_close_risk_requires_residual_score() {
        let engine = WorkflowEngine::new();
        let mut rec = record(RecordKind::Risk, Open);

        assert!(engine.transition(&mut rec, Closed, "dan", "accepted").is_err());
        rec.attributes = serde_json::json!({"residual_score": 3});
        assert!(engine.transition(&mut rec, Closed, "dan", "accepted").is_ok());
    }

    #[test]
    fn test_capa_verification_requires_effectiveness_check() {
        let engine = WorkflowEngine::new();
        let mut rec = record(RecordKind::Capa, Implemented);

        assert!(engine.transition(&mut rec, Verified, "erin", "").is_err());
        rec.attributes = serde_json::json!({"effectiveness_check": "no recurrence in 90 days"});
        assert!(engine.transition(&mut rec, Verified, "erin", "").is_ok());
    }

    #[test]
    fn test_approval_targets_are_reserved() {
        let engine = WorkflowEngine::new();
        let mut rec = record(RecordKind::Capa, PendingApproval);

        let err = engine.transition(&mut rec, Approved, "frank", "").unwrap_err();
        assert!(matches!(err, WorkflowError::ApprovalRequired(_)));
        assert_eq!(rec.status, PendingApproval);
    }

    #[test]
    fn test_resolve_approval() {
        let engine = WorkflowEngine::new();
        let mut rec = record(RecordKind::Policy, PendingApproval);

        let mut request =
            ApprovalRequest::open(rec.tenant.clone(), rec.id, "author", 1, None).unwrap();
        request
            .decide("qa-lead", Decision::Approve, Some("looks good".to_string()))
            .unwrap();

        let entry = engine.resolve_approval(&mut rec, &request).unwrap();
        assert_eq!(rec.status, Approved);
        assert_eq!(entry.actor, "qa-lead");
        assert_eq!(entry.reason, "looks good");
    }

    #[test]
    fn test_resolve_pending_request_fails() {
        let engine = WorkflowEngine::new();
        let mut rec = record(RecordKind::Capa, PendingApproval);
        let request = ApprovalRequest::open(rec.tenant.clone(), rec.id, "author", 2, None).unwrap();

        assert!(matches!(
            engine.resolve_approval(&mut rec, &request),
            Err(WorkflowError::NoPendingApproval)
        ));
    }
}
