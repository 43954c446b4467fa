//! End-to-end flows through the service, the job queue and the workers,
//! all on in-memory backends.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use quality_governance::cache::{KeyBuilder, TenantCache};
use quality_governance::domain::{GovernanceRecord, RecordKind, RecordStatus, TenantId};
use quality_governance::jobs::{
    Dispatcher, JobError, JobStore, MemoryJobQueue, Notification, NotificationSender, RetryPolicy,
    WorkerPool, WorkerPoolConfig,
};
use quality_governance::storage::MemoryStore;
use quality_governance::workflow::Decision;
use quality_governance::GovernanceService;

/// Fails the first `failures` deliveries, then records the rest.
#[derive(Default)]
struct FlakySender {
    failures: Mutex<u32>,
    delivered: Mutex<Vec<Notification>>,
}

impl FlakySender {
    fn failing(failures: u32) -> Self {
        Self {
            failures: Mutex::new(failures),
            delivered: Mutex::new(Vec::new()),
        }
    }

    fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSender for FlakySender {
    async fn send(&self, notification: &Notification) -> Result<(), JobError> {
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(JobError::Retryable("webhook 503".to_string()));
        }
        self.delivered.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct Platform {
    service: GovernanceService,
    store: Arc<MemoryStore>,
    queue: Arc<MemoryJobQueue>,
    tenant: TenantId,
}

fn platform() -> Platform {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryJobQueue::new("flow:jobs"));
    let cache = Arc::new(TenantCache::memory(
        KeyBuilder::new("flow"),
        100,
        Duration::from_secs(60),
    ));
    let service = GovernanceService::new(store.clone(), cache, queue.clone()).with_job_max_attempts(3);
    Platform {
        service,
        store,
        queue,
        tenant: TenantId::parse("acme").unwrap(),
    }
}

fn pool(platform: &Platform, sender: Arc<FlakySender>) -> WorkerPool {
    let handler = Arc::new(Dispatcher::new(
        sender,
        platform.store.clone(),
        platform.queue.clone(),
    ));
    let config = WorkerPoolConfig::new(2)
        .with_poll_interval(Duration::from_millis(10))
        .with_job_timeout(Duration::from_secs(1))
        .with_retry(RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.0,
        });
    WorkerPool::new(config, platform.queue.clone(), handler)
}

/// Promotes delayed retries until `done` holds or two seconds pass.
async fn wait_until<F>(queue: &MemoryJobQueue, mut done: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if done() {
            return;
        }
        let _ = queue
            .promote_due(chrono::Utc::now() + chrono::Duration::seconds(60))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_capa_lifecycle_notifies_owner_and_requester() {
    let platform = platform();
    let sender = Arc::new(FlakySender::default());
    let mut pool = pool(&platform, sender.clone());
    pool.start().await.unwrap();

    let draft = GovernanceRecord::draft(platform.tenant.clone(), RecordKind::Capa, "Supplier nonconformance")
        .unwrap()
        .with_owner("quality-owner");
    let capa = platform.service.open_record(draft).await.unwrap();
    assert!(capa.reference.starts_with("CAPA-"));

    for to in [RecordStatus::Open, RecordStatus::InProgress, RecordStatus::PendingApproval] {
        platform
            .service
            .transition(&platform.tenant, capa.id, to, "engineer", "", None)
            .await
            .unwrap();
    }
    let decided = platform
        .service
        .decide_approval(&platform.tenant, capa.id, "qa-manager", Decision::Approve, None)
        .await
        .unwrap();
    assert_eq!(decided.record.status, RecordStatus::Approved);

    // three owner notifications, one requester notification
    wait_until(&platform.queue, || sender.delivered().len() >= 4).await;
    pool.shutdown().await.unwrap();

    let delivered = sender.delivered();
    let to_owner = delivered.iter().filter(|n| n.recipient == "quality-owner").count();
    let to_requester = delivered.iter().filter(|n| n.recipient == "engineer").count();
    assert_eq!(to_owner, 3);
    assert_eq!(to_requester, 1);
    assert!(delivered.iter().all(|n| n.tenant.as_deref() == Some("acme")));
}

#[tokio::test]
async fn test_flaky_delivery_is_retried() {
    let platform = platform();
    let sender = Arc::new(FlakySender::failing(2));
    let mut pool = pool(&platform, sender.clone());
    pool.start().await.unwrap();

    let draft = GovernanceRecord::draft(platform.tenant.clone(), RecordKind::Risk, "Single-source supplier")
        .unwrap()
        .with_owner("risk-owner");
    let risk = platform.service.open_record(draft).await.unwrap();
    platform
        .service
        .transition(&platform.tenant, risk.id, RecordStatus::Open, "analyst", "", None)
        .await
        .unwrap();

    wait_until(&platform.queue, || !sender.delivered().is_empty()).await;
    let stats = pool.stats();
    pool.shutdown().await.unwrap();

    assert_eq!(sender.delivered().len(), 1);
    assert_eq!(stats.jobs_retried, 2);
    assert_eq!(platform.queue.stats().await.unwrap().dead_letter_jobs, 0);
}

#[tokio::test]
async fn test_exhausted_delivery_lands_in_dead_letter_and_replays() {
    let platform = platform();
    let sender = Arc::new(FlakySender::failing(3));
    let mut pool = pool(&platform, sender.clone());
    pool.start().await.unwrap();

    let draft = GovernanceRecord::draft(platform.tenant.clone(), RecordKind::Incident, "Forklift near miss")
        .unwrap()
        .with_owner("ehs-owner");
    let incident = platform.service.open_record(draft).await.unwrap();
    platform
        .service
        .transition(&platform.tenant, incident.id, RecordStatus::Open, "supervisor", "", None)
        .await
        .unwrap();

    let queue = platform.queue.clone();
    for _ in 0..200 {
        if queue.stats().await.unwrap().dead_letter_jobs == 1 {
            break;
        }
        let _ = queue
            .promote_due(chrono::Utc::now() + chrono::Duration::seconds(60))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let dead = queue.peek_dead_letter(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job.attempts, 3);
    assert!(dead[0].error.contains("webhook 503"));

    // the sender has recovered; a replay delivers the notification
    assert_eq!(queue.replay_dead_letter(10).await.unwrap(), 1);
    wait_until(&queue, || !sender.delivered().is_empty()).await;
    pool.shutdown().await.unwrap();

    assert_eq!(sender.delivered().len(), 1);
    assert_eq!(sender.delivered()[0].recipient, "ehs-owner");
}

#[tokio::test]
async fn test_tenants_do_not_share_references_or_records() {
    let platform = platform();
    let globex = TenantId::parse("globex").unwrap();

    let a = platform
        .service
        .open_record(GovernanceRecord::draft(platform.tenant.clone(), RecordKind::Complaint, "Late delivery").unwrap())
        .await
        .unwrap();
    let b = platform
        .service
        .open_record(GovernanceRecord::draft(globex.clone(), RecordKind::Complaint, "Damaged goods").unwrap())
        .await
        .unwrap();

    // each tenant has its own sequence
    assert_eq!(a.reference, b.reference);
    assert!(platform.service.get_record(&globex, a.id).await.is_err());
    assert!(platform.service.get_record(&platform.tenant, b.id).await.is_err());

    let opened = platform
        .service
        .transition(
            &globex,
            b.id,
            RecordStatus::Open,
            "agent",
            "",
            Some(json!({ "channel": "phone" })),
        )
        .await
        .unwrap();
    assert_eq!(opened.record.text_attribute("channel"), Some("phone"));
}
