//! In-process [`RecordStore`] used in tests and when no database is configured.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ApprovalWrite, AuditResult, RecordStore, StorageError};
use crate::domain::{GovernanceRecord, RecordKind, Reference, TenantId, TransitionRecord};
use crate::workflow::{ApprovalRequest, ApprovalState};

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<Uuid, GovernanceRecord>,
    sequences: HashMap<(TenantId, RecordKind, i32), u32>,
    transitions: Vec<TransitionRecord>,
    approvals: HashMap<Uuid, ApprovalRequest>,
    audit_results: Vec<AuditResult>,
}

/// Memory-backed record store.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Makes `ping` fail, to exercise readiness reporting.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Audit results stored for a tenant, oldest first.
    pub async fn audit_results(&self, tenant: &TenantId) -> Vec<AuditResult> {
        self.state
            .read()
            .await
            .audit_results
            .iter()
            .filter(|r| &r.tenant == tenant)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn ping(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::ConnectionFailed("memory store marked unavailable".to_string()))
        }
    }

    async fn open_record(&self, mut record: GovernanceRecord) -> Result<GovernanceRecord, StorageError> {
        let mut state = self.state.write().await;

        let year = record.reference_year();
        let sequence = state
            .sequences
            .entry((record.tenant.clone(), record.kind, year))
            .or_insert(0);
        *sequence += 1;
        record.reference = Reference::new(record.kind, year, *sequence).to_string();

        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_record(
        &self,
        tenant: &TenantId,
        id: Uuid,
    ) -> Result<Option<GovernanceRecord>, StorageError> {
        let state = self.state.read().await;
        Ok(state.records.get(&id).filter(|r| &r.tenant == tenant).cloned())
    }

    async fn save_transition(
        &self,
        record: &GovernanceRecord,
        transition: &TransitionRecord,
        expected_version: i64,
        approval: Option<ApprovalWrite<'_>>,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().await;

        // every check runs before the first mutation
        let stored = state
            .records
            .get(&record.id)
            .filter(|r| r.tenant == record.tenant)
            .ok_or_else(|| StorageError::NotFound(record.id.to_string()))?;
        if stored.version != expected_version {
            return Err(StorageError::Conflict(format!(
                "record {} changed since version {}",
                record.reference, expected_version
            )));
        }
        if let Some(write) = &approval {
            check_approval(&state, write)?;
        }

        if let Some(stored) = state.records.get_mut(&record.id) {
            stored.status = record.status;
            stored.version = record.version;
            stored.attributes = record.attributes.clone();
            stored.updated_at = record.updated_at;
        }
        state.transitions.push(transition.clone());
        if let Some(write) = approval {
            state.approvals.insert(write.request.id, write.request.clone());
        }
        Ok(())
    }

    async fn list_transitions(
        &self,
        tenant: &TenantId,
        record_id: Uuid,
    ) -> Result<Vec<TransitionRecord>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .transitions
            .iter()
            .filter(|t| &t.tenant == tenant && t.record_id == record_id)
            .cloned()
            .collect())
    }

    async fn save_approval(&self, write: ApprovalWrite<'_>) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        check_approval(&state, &write)?;
        state.approvals.insert(write.request.id, write.request.clone());
        Ok(())
    }

    async fn get_open_approval(
        &self,
        tenant: &TenantId,
        record_id: Uuid,
    ) -> Result<Option<ApprovalRequest>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .approvals
            .values()
            .filter(|a| &a.tenant == tenant && a.record_id == record_id)
            .filter(|a| a.state == ApprovalState::Pending)
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn save_audit_result(&self, result: &AuditResult) -> Result<(), StorageError> {
        self.state.write().await.audit_results.push(result.clone());
        Ok(())
    }

    async fn purge_transitions_before(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut state = self.state.write().await;
        let count = state.transitions.len();
        state.transitions.retain(|t| t.occurred_at >= before);
        Ok((count - state.transitions.len()) as u64)
    }
}

/// Inserts require a fresh id; updates require the stored version to match.
fn check_approval(state: &StoreState, write: &ApprovalWrite<'_>) -> Result<(), StorageError> {
    let stored = state
        .approvals
        .get(&write.request.id)
        .filter(|a| a.tenant == write.request.tenant);
    match (stored, write.expected_version) {
        (None, None) => Ok(()),
        (Some(stored), Some(expected)) if stored.version == expected => Ok(()),
        (None, Some(_)) => Err(StorageError::NotFound(write.request.id.to_string())),
        _ => Err(write.conflict()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RecordStatus;
    use crate::workflow::{Decision, WorkflowEngine};

    fn tenant(name: &str) -> TenantId {
        TenantId::parse(name).unwrap()
    }

    async fn open(store: &MemoryStore, tenant: &TenantId, kind: RecordKind) -> GovernanceRecord {
        store
            .open_record(GovernanceRecord::draft(tenant.clone(), kind, "Nonconformity").unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_reference_sequences_are_per_tenant_and_kind() {
        let store = MemoryStore::new();
        let acme = tenant("acme");
        let globex = tenant("globex");

        let a1 = open(&store, &acme, RecordKind::Incident).await;
        let a2 = open(&store, &acme, RecordKind::Incident).await;
        let a3 = open(&store, &acme, RecordKind::Capa).await;
        let g1 = open(&store, &globex, RecordKind::Incident).await;

        let year = a1.reference_year();
        assert_eq!(a1.reference, format!("INC-{}-00001", year));
        assert_eq!(a2.reference, format!("INC-{}-00002", year));
        assert_eq!(a3.reference, format!("CAPA-{}-00001", year));
        assert_eq!(g1.reference, format!("INC-{}-00001", year));
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let store = MemoryStore::new();
        let record = open(&store, &tenant("acme"), RecordKind::Risk).await;

        assert!(store.get_record(&tenant("acme"), record.id).await.unwrap().is_some());
        assert!(store.get_record(&tenant("globex"), record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_transition_checks_version() {
        let store = MemoryStore::new();
        let acme = tenant("acme");
        let engine = WorkflowEngine::new();
        let record = open(&store, &acme, RecordKind::Incident).await;

        let mut moved = record.clone();
        let transition = engine.transition(&mut moved, RecordStatus::Open, "alice", "triaged").unwrap();
        store.save_transition(&moved, &transition, record.version, None).await.unwrap();

        let mut stale = record.clone();
        let again = engine.transition(&mut stale, RecordStatus::Open, "bob", "").unwrap();
        let result = store.save_transition(&stale, &again, record.version, None).await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));

        let stored = store.get_record(&acme, record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordStatus::Open);
        assert_eq!(stored.version, 2);
        assert_eq!(store.list_transitions(&acme, record.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_approval_lookup() {
        let store = MemoryStore::new();
        let acme = tenant("acme");
        let record = open(&store, &acme, RecordKind::Capa).await;

        let mut request = ApprovalRequest::open(acme.clone(), record.id, "alice", 1, None).unwrap();
        store.save_approval(ApprovalWrite::insert(&request)).await.unwrap();
        assert!(store.get_open_approval(&acme, record.id).await.unwrap().is_some());
        assert!(store.get_open_approval(&tenant("globex"), record.id).await.unwrap().is_none());

        let read = request.version;
        request.decide("qa-lead", Decision::Approve, None).unwrap();
        store.save_approval(ApprovalWrite::update(&request, read)).await.unwrap();
        assert!(store.get_open_approval(&acme, record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_approval_decision_conflicts() {
        let store = MemoryStore::new();
        let acme = tenant("acme");
        let record = open(&store, &acme, RecordKind::Capa).await;

        let request = ApprovalRequest::open(acme.clone(), record.id, "alice", 2, None).unwrap();
        store.save_approval(ApprovalWrite::insert(&request)).await.unwrap();
        assert!(matches!(
            store.save_approval(ApprovalWrite::insert(&request)).await,
            Err(StorageError::Conflict(_))
        ));

        // two approvers decide on the same snapshot
        let mut bob = store.get_open_approval(&acme, record.id).await.unwrap().unwrap();
        let mut carol = bob.clone();
        let read = bob.version;
        bob.decide("bob", Decision::Approve, None).unwrap();
        carol.decide("carol", Decision::Approve, None).unwrap();

        store.save_approval(ApprovalWrite::update(&bob, read)).await.unwrap();
        let lost = store.save_approval(ApprovalWrite::update(&carol, read)).await;
        assert!(matches!(lost, Err(StorageError::Conflict(_))));

        let stored = store.get_open_approval(&acme, record.id).await.unwrap().unwrap();
        assert_eq!(stored.decisions.len(), 1);
        assert_eq!(stored.decisions[0].approver, "bob");
    }

    #[tokio::test]
    async fn test_transition_and_approval_are_written_together() {
        let store = MemoryStore::new();
        let acme = tenant("acme");
        let engine = WorkflowEngine::new();
        let record = open(&store, &acme, RecordKind::Policy).await;

        let request = ApprovalRequest::open(acme.clone(), record.id, "alice", 1, None).unwrap();
        store.save_approval(ApprovalWrite::insert(&request)).await.unwrap();

        // the approval write fails its check, so the status change is dropped too
        let mut moved = record.clone();
        let transition = engine.transition(&mut moved, RecordStatus::UnderReview, "alice", "").unwrap();
        let result = store
            .save_transition(&moved, &transition, record.version, Some(ApprovalWrite::insert(&request)))
            .await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));

        let stored = store.get_record(&acme, record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, record.status);
        assert_eq!(stored.version, record.version);
        assert!(store.list_transitions(&acme, record.id).await.unwrap().is_empty());

        // a passing approval write lands with the transition
        let mut decided = request.clone();
        decided.decide("qa-lead", Decision::Approve, None).unwrap();
        store
            .save_transition(
                &moved,
                &transition,
                record.version,
                Some(ApprovalWrite::update(&decided, request.version)),
            )
            .await
            .unwrap();
        assert!(store.get_open_approval(&acme, record.id).await.unwrap().is_none());
        assert_eq!(store.list_transitions(&acme, record.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_transitions_before() {
        let store = MemoryStore::new();
        let acme = tenant("acme");
        let engine = WorkflowEngine::new();
        let mut record = open(&store, &acme, RecordKind::Incident).await;

        let expected = record.version;
        let mut transition = engine.transition(&mut record, RecordStatus::Open, "alice", "").unwrap();
        transition.occurred_at = Utc::now() - chrono::Duration::days(400);
        store.save_transition(&record, &transition, expected, None).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(365);
        assert_eq!(store.purge_transitions_before(cutoff).await.unwrap(), 1);
        assert!(store.list_transitions(&acme, record.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_ping() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(store.ping().await, Err(StorageError::ConnectionFailed(_))));
        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
