//! Job handlers: notification delivery and retention cleanup.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use super::job::{CleanupTarget, Job, JobKind};
use super::queue::JobStore;
use super::worker_pool::{JobError, JobHandler, JobOutcome};
use crate::storage::RecordStore;

/// A message on its way to a person or system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Id of the job carrying the message; receivers use it to drop duplicates.
    pub job_id: String,
    pub tenant: Option<String>,
    pub channel: String,
    pub recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
}

impl Notification {
    /// Builds the notification carried by a SendEmail or Notify job.
    pub fn from_job(job: &Job) -> Option<Self> {
        let (channel, recipient, subject, body) = match &job.kind {
            JobKind::SendEmail { to, subject, body } => {
                ("email", to, Some(subject.clone()), body)
            }
            JobKind::Notify {
                recipient,
                channel,
                message,
            } => (channel.as_str(), recipient, None, message),
            JobKind::Cleanup { .. } => return None,
        };

        Some(Self {
            job_id: job.id.to_string(),
            tenant: job.tenant.as_ref().map(|t| t.to_string()),
            channel: channel.to_string(),
            recipient: recipient.clone(),
            subject,
            body: body.clone(),
        })
    }
}

/// Delivers notifications.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), JobError>;
}

/// Posts notifications as JSON to a webhook.
///
/// Connection failures, timeouts, 429 and 5xx responses are retryable; any
/// other non-success status is permanent.
pub struct WebhookSender {
    client: Client,
    url: String,
}

impl WebhookSender {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(&self, notification: &Notification) -> Result<(), JobError> {
        let response = self
            .client
            .post(&self.url)
            .header("x-idempotency-key", &notification.job_id)
            .json(notification)
            .send()
            .await
            .map_err(|e| JobError::Retryable(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(recipient = %notification.recipient, status = status.as_u16(), "Webhook accepted notification");
            return Ok(());
        }
        Err(classify_status(status))
    }
}

fn classify_status(status: StatusCode) -> JobError {
    let message = format!("webhook responded with {}", status);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        JobError::Retryable(message)
    } else {
        JobError::Permanent(message)
    }
}

/// Writes notifications to the log. Used when no webhook is configured.
#[derive(Debug, Clone, Default)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, notification: &Notification) -> Result<(), JobError> {
        info!(
            tenant = notification.tenant.as_deref().unwrap_or("-"),
            channel = %notification.channel,
            recipient = %notification.recipient,
            subject = notification.subject.as_deref().unwrap_or(""),
            body = %notification.body,
            "Notification"
        );
        Ok(())
    }
}

/// Routes each job kind to the code that performs it.
pub struct Dispatcher {
    sender: Arc<dyn NotificationSender>,
    records: Arc<dyn RecordStore>,
    jobs: Arc<dyn JobStore>,
}

impl Dispatcher {
    pub fn new(
        sender: Arc<dyn NotificationSender>,
        records: Arc<dyn RecordStore>,
        jobs: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            sender,
            records,
            jobs,
        }
    }

    async fn cleanup(&self, target: CleanupTarget, older_than_days: u32) -> Result<JobOutcome, JobError> {
        let before = Utc::now() - chrono::Duration::days(i64::from(older_than_days));

        let purged = match target {
            CleanupTarget::Transitions => self
                .records
                .purge_transitions_before(before)
                .await
                .map_err(|e| JobError::Retryable(e.to_string()))?,
            CleanupTarget::JobResults => self
                .jobs
                .purge_results(before)
                .await
                .map_err(|e| JobError::Retryable(e.to_string()))? as u64,
        };

        info!(cleanup = target.as_str(), purged, older_than_days, "Cleanup finished");
        Ok(JobOutcome::with_output(json!({
            "target": target.as_str(),
            "purged": purged,
        })))
    }
}

#[async_trait]
impl JobHandler for Dispatcher {
    async fn handle(&self, job: &Job) -> Result<JobOutcome, JobError> {
        if let JobKind::Cleanup {
            target,
            older_than_days,
        } = &job.kind
        {
            return self.cleanup(*target, *older_than_days).await;
        }

        let notification = Notification::from_job(job)
            .ok_or_else(|| JobError::Permanent(format!("no notification in {} job", job.kind.name())))?;
        self.sender.send(&notification).await?;
        Ok(JobOutcome::with_output(json!({
            "channel": notification.channel,
            "recipient": notification.recipient,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GovernanceRecord, RecordKind, RecordStatus, TenantId};
    use crate::jobs::memory::MemoryJobQueue;
    use crate::storage::MemoryStore;
    use crate::workflow::WorkflowEngine;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl NotificationSender for RecordingSender {
        async fn send(&self, notification: &Notification) -> Result<(), JobError> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn dispatcher(sender: Arc<dyn NotificationSender>) -> (Dispatcher, Arc<MemoryStore>, Arc<MemoryJobQueue>) {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new("test"));
        let dispatcher = Dispatcher::new(sender, store.clone(), queue.clone());
        (dispatcher, store, queue)
    }

    #[tokio::test]
    async fn test_notify_job_is_delivered() {
        let sender = Arc::new(RecordingSender::default());
        let (dispatcher, _, _) = dispatcher(sender.clone());

        let job = Job::for_tenant(
            TenantId::parse("acme").unwrap(),
            JobKind::Notify {
                recipient: "alice".into(),
                channel: "email".into(),
                message: "CAPA-2026-00001 approved".into(),
            },
        );
        dispatcher.handle(&job).await.unwrap();

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "alice");
        assert_eq!(sent[0].tenant.as_deref(), Some("acme"));
        assert_eq!(sent[0].job_id, job.id.to_string());
    }

    #[tokio::test]
    async fn test_send_email_carries_subject() {
        let sender = Arc::new(RecordingSender::default());
        let (dispatcher, _, _) = dispatcher(sender.clone());

        let job = Job::system(JobKind::SendEmail {
            to: "qa@example.com".into(),
            subject: "Audit due".into(),
            body: "AUD-2026-00003 starts Monday".into(),
        });
        dispatcher.handle(&job).await.unwrap();

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent[0].channel, "email");
        assert_eq!(sent[0].subject.as_deref(), Some("Audit due"));
    }

    #[tokio::test]
    async fn test_cleanup_purges_old_transitions() {
        let (dispatcher, store, _) = dispatcher(Arc::new(LogSender));
        let tenant = TenantId::parse("acme").unwrap();
        let mut record = store
            .open_record(GovernanceRecord::draft(tenant.clone(), RecordKind::Incident, "Spill").unwrap())
            .await
            .unwrap();

        let expected = record.version;
        let mut transition = WorkflowEngine::new()
            .transition(&mut record, RecordStatus::Open, "alice", "")
            .unwrap();
        transition.occurred_at = Utc::now() - chrono::Duration::days(30);
        store.save_transition(&record, &transition, expected, None).await.unwrap();

        let job = Job::system(JobKind::Cleanup {
            target: CleanupTarget::Transitions,
            older_than_days: 7,
        });
        let outcome = dispatcher.handle(&job).await.unwrap();
        assert_eq!(outcome.output.unwrap()["purged"], 1);
        assert!(store.list_transitions(&tenant, record.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_of_job_results() {
        let (dispatcher, _, queue) = dispatcher(Arc::new(LogSender));
        let job = Job::system(JobKind::Cleanup {
            target: CleanupTarget::JobResults,
            older_than_days: 1,
        });
        let outcome = dispatcher.handle(&job).await.unwrap();
        assert_eq!(outcome.output.unwrap()["target"], "job_results");
        assert_eq!(queue.stats().await.unwrap().total_jobs(), 0);
    }

    #[test]
    fn test_status_classification() {
        assert!(!classify_status(StatusCode::SERVICE_UNAVAILABLE).is_permanent());
        assert!(!classify_status(StatusCode::TOO_MANY_REQUESTS).is_permanent());
        assert!(classify_status(StatusCode::BAD_REQUEST).is_permanent());
        assert!(classify_status(StatusCode::NOT_FOUND).is_permanent());
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_retryable() {
        let sender = WebhookSender::new("http://127.0.0.1:9/hook", Duration::from_millis(500)).unwrap();
        let notification = Notification {
            job_id: "job-1".into(),
            tenant: None,
            channel: "webhook".into(),
            recipient: "ops".into(),
            subject: None,
            body: "ping".into(),
        };
        let err = sender.send(&notification).await.unwrap_err();
        assert!(matches!(err, JobError::Retryable(_)));
    }
}
