//! PostgreSQL implementation of [`RecordStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgConnection, PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::migrations::MigrationRunner;
use super::{ApprovalWrite, AuditResult, RecordStore, StorageError};
use crate::config::DatabaseConfig;
use crate::domain::{GovernanceRecord, Reference, TenantId, TransitionRecord};
use crate::workflow::{ApprovalRequest, ApprovalState};

/// PostgreSQL database client.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Builds the connection pool from configuration.
    ///
    /// Connections are recycled after `pool_recycle_secs` and, with
    /// `pool_pre_ping`, tested before being handed out.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StorageError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| StorageError::ConnectionFailed("database url is not configured".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .min_connections(config.min_connections)
            .max_lifetime(config.pool_recycle())
            .test_before_acquire(config.pool_pre_ping)
            .acquire_timeout(config.acquire_timeout())
            .connect(url)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        info!(
            pool_size = config.pool_size,
            pre_ping = config.pool_pre_ping,
            "Connected to database"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs database migrations and returns how many were applied.
    pub async fn run_migrations(&self) -> Result<usize, StorageError> {
        let runner = MigrationRunner::new(self.pool.clone());
        Ok(runner.run_migrations().await?)
    }
}

#[async_trait]
impl RecordStore for Database {
    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn open_record(&self, mut record: GovernanceRecord) -> Result<GovernanceRecord, StorageError> {
        let mut tx = self.pool.begin().await?;

        let year = record.reference_year();
        let (sequence,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO record_sequences (tenant_id, kind, year, last_value)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (tenant_id, kind, year) DO UPDATE SET
                last_value = record_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(record.tenant.as_str())
        .bind(record.kind.as_str())
        .bind(year)
        .fetch_one(&mut *tx)
        .await?;

        record.reference = Reference::new(record.kind, year, sequence as u32).to_string();

        sqlx::query(
            r#"
            INSERT INTO governance_records (
                id, tenant_id, kind, reference, title, status, severity,
                owner, attributes, version, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id)
        .bind(record.tenant.as_str())
        .bind(record.kind.as_str())
        .bind(&record.reference)
        .bind(&record.title)
        .bind(record.status.as_str())
        .bind(record.severity.as_str())
        .bind(&record.owner)
        .bind(&record.attributes)
        .bind(record.version)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(tenant = %record.tenant, reference = %record.reference, "Opened record");
        Ok(record)
    }

    async fn get_record(
        &self,
        tenant: &TenantId,
        id: Uuid,
    ) -> Result<Option<GovernanceRecord>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, kind, reference, title, status, severity,
                   owner, attributes, version, created_at, updated_at
            FROM governance_records
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| record_from_row(&r)).transpose()
    }

    async fn save_transition(
        &self,
        record: &GovernanceRecord,
        transition: &TransitionRecord,
        expected_version: i64,
        approval: Option<ApprovalWrite<'_>>,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE governance_records
            SET status = $1, version = $2, attributes = $3, updated_at = $4
            WHERE tenant_id = $5 AND id = $6 AND version = $7
            "#,
        )
        .bind(record.status.as_str())
        .bind(record.version)
        .bind(&record.attributes)
        .bind(record.updated_at)
        .bind(record.tenant.as_str())
        .bind(record.id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!(
                "record {} changed since version {}",
                record.reference, expected_version
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO record_transitions (
                id, tenant_id, record_id, from_status, to_status, actor, reason, occurred_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(transition.id)
        .bind(transition.tenant.as_str())
        .bind(transition.record_id)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(&transition.actor)
        .bind(&transition.reason)
        .bind(transition.occurred_at)
        .execute(&mut *tx)
        .await?;

        // an early return drops the transaction, rolling the update back
        if let Some(write) = approval {
            write_approval(&mut *tx, write).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_transitions(
        &self,
        tenant: &TenantId,
        record_id: Uuid,
    ) -> Result<Vec<TransitionRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, record_id, from_status, to_status, actor, reason, occurred_at
            FROM record_transitions
            WHERE tenant_id = $1 AND record_id = $2
            ORDER BY occurred_at, id
            "#,
        )
        .bind(tenant.as_str())
        .bind(record_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transition_from_row).collect()
    }

    async fn save_approval(&self, write: ApprovalWrite<'_>) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await?;
        write_approval(&mut *conn, write).await
    }

    async fn get_open_approval(
        &self,
        tenant: &TenantId,
        record_id: Uuid,
    ) -> Result<Option<ApprovalRequest>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, record_id, requested_by, required_approvals,
                   eligible_approvers, decisions, state, created_at, resolved_at, version
            FROM approval_requests
            WHERE tenant_id = $1 AND record_id = $2 AND state = $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant.as_str())
        .bind(record_id)
        .bind(ApprovalState::Pending.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| approval_from_row(&r)).transpose()
    }

    async fn save_audit_result(&self, result: &AuditResult) -> Result<(), StorageError> {
        let report = serde_json::to_value(&result.report)?;

        sqlx::query(
            r#"
            INSERT INTO audit_results (
                id, tenant_id, record_id, template_id, template_version,
                outcome, percentage, report, scored_by, scored_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(result.id)
        .bind(result.tenant.as_str())
        .bind(result.record_id)
        .bind(&result.report.template_id)
        .bind(result.report.template_version as i32)
        .bind(result.report.outcome.as_str())
        .bind(result.report.percentage)
        .bind(report)
        .bind(&result.scored_by)
        .bind(result.scored_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge_transitions_before(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM record_transitions WHERE occurred_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Inserts a new request, or updates a stored one only while its version
/// still equals the expected one.
async fn write_approval(conn: &mut PgConnection, write: ApprovalWrite<'_>) -> Result<(), StorageError> {
    let request = write.request;
    let decisions = serde_json::to_value(&request.decisions)?;

    let written = match write.expected_version {
        None => {
            let eligible = request
                .eligible_approvers
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?;
            sqlx::query(
                r#"
                INSERT INTO approval_requests (
                    id, tenant_id, record_id, requested_by, required_approvals,
                    eligible_approvers, decisions, state, created_at, resolved_at, version
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(request.id)
            .bind(request.tenant.as_str())
            .bind(request.record_id)
            .bind(&request.requested_by)
            .bind(request.required_approvals as i32)
            .bind(eligible)
            .bind(decisions)
            .bind(request.state.as_str())
            .bind(request.created_at)
            .bind(request.resolved_at)
            .bind(request.version)
            .execute(&mut *conn)
            .await?
        }
        Some(expected) => {
            sqlx::query(
                r#"
                UPDATE approval_requests
                SET decisions = $1, state = $2, resolved_at = $3, version = $4
                WHERE tenant_id = $5 AND id = $6 AND version = $7
                "#,
            )
            .bind(decisions)
            .bind(request.state.as_str())
            .bind(request.resolved_at)
            .bind(request.version)
            .bind(request.tenant.as_str())
            .bind(request.id)
            .bind(expected)
            .execute(&mut *conn)
            .await?
        }
    };

    if written.rows_affected() == 0 {
        return Err(write.conflict());
    }
    Ok(())
}

fn record_from_row(row: &PgRow) -> Result<GovernanceRecord, StorageError> {
    let tenant: String = row.get("tenant_id");
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let severity: String = row.get("severity");

    Ok(GovernanceRecord {
        id: row.get("id"),
        tenant: TenantId::parse(tenant)?,
        kind: kind.parse()?,
        reference: row.get("reference"),
        title: row.get("title"),
        status: status.parse()?,
        severity: severity.parse()?,
        owner: row.get("owner"),
        attributes: row.get("attributes"),
        version: row.get("version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn transition_from_row(row: &PgRow) -> Result<TransitionRecord, StorageError> {
    let tenant: String = row.get("tenant_id");
    let from: String = row.get("from_status");
    let to: String = row.get("to_status");

    Ok(TransitionRecord {
        id: row.get("id"),
        record_id: row.get("record_id"),
        tenant: TenantId::parse(tenant)?,
        from: from.parse()?,
        to: to.parse()?,
        actor: row.get("actor"),
        reason: row.get("reason"),
        occurred_at: row.get("occurred_at"),
    })
}

fn approval_from_row(row: &PgRow) -> Result<ApprovalRequest, StorageError> {
    let tenant: String = row.get("tenant_id");
    let required: i32 = row.get("required_approvals");
    let eligible: Option<serde_json::Value> = row.get("eligible_approvers");
    let decisions: serde_json::Value = row.get("decisions");
    let state: String = row.get("state");

    Ok(ApprovalRequest {
        id: row.get("id"),
        tenant: TenantId::parse(tenant)?,
        record_id: row.get("record_id"),
        requested_by: row.get("requested_by"),
        required_approvals: required.max(1) as u32,
        eligible_approvers: eligible.map(serde_json::from_value).transpose()?,
        decisions: serde_json::from_value(decisions)?,
        state: serde_json::from_value(serde_json::Value::String(state))?,
        created_at: row.get("created_at"),
        resolved_at: row.get("resolved_at"),
        version: row.get("version"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RecordKind, RecordStatus};
    use crate::workflow::{Decision, WorkflowEngine};

    async fn database() -> Database {
        let config = DatabaseConfig {
            url: std::env::var("DATABASE_URL").ok(),
            ..Default::default()
        };
        let db = Database::connect(&config).await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_connect_without_url_fails() {
        let result = Database::connect(&DatabaseConfig::default()).await;
        assert!(matches!(result, Err(StorageError::ConnectionFailed(_))));
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a Postgres instance"]
    async fn test_references_are_allocated_per_tenant() {
        let db = database().await;
        let suffix = Uuid::new_v4().simple().to_string();
        let acme = TenantId::parse(format!("acme-{}", &suffix[..8])).unwrap();
        let globex = TenantId::parse(format!("globex-{}", &suffix[..8])).unwrap();

        let first = db
            .open_record(GovernanceRecord::draft(acme.clone(), RecordKind::Incident, "Spill").unwrap())
            .await
            .unwrap();
        let second = db
            .open_record(GovernanceRecord::draft(acme.clone(), RecordKind::Incident, "Fire").unwrap())
            .await
            .unwrap();
        let other = db
            .open_record(GovernanceRecord::draft(globex.clone(), RecordKind::Incident, "Spill").unwrap())
            .await
            .unwrap();

        assert!(first.reference.ends_with("-00001"));
        assert!(second.reference.ends_with("-00002"));
        assert!(other.reference.ends_with("-00001"));
        assert!(db.get_record(&globex, first.id).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a Postgres instance"]
    async fn test_stale_version_conflicts() {
        let db = database().await;
        let tenant = TenantId::parse("acme-conflict").unwrap();
        let engine = WorkflowEngine::new();

        let record = db
            .open_record(GovernanceRecord::draft(tenant.clone(), RecordKind::Risk, "Supplier").unwrap())
            .await
            .unwrap();

        let mut first = record.clone();
        let t1 = engine.transition(&mut first, RecordStatus::Open, "alice", "").unwrap();
        db.save_transition(&first, &t1, record.version, None).await.unwrap();

        let mut stale = record.clone();
        let t2 = engine.transition(&mut stale, RecordStatus::Cancelled, "bob", "dup").unwrap();
        let result = db.save_transition(&stale, &t2, record.version, None).await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));

        let history = db.list_transitions(&tenant, record.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].to, RecordStatus::Open);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a Postgres instance"]
    async fn test_stale_approval_decision_conflicts() {
        let db = database().await;
        let tenant = TenantId::parse("acme-approvals").unwrap();
        let record = db
            .open_record(GovernanceRecord::draft(tenant.clone(), RecordKind::Capa, "Seal leak").unwrap())
            .await
            .unwrap();

        let request = ApprovalRequest::open(tenant.clone(), record.id, "alice", 2, None).unwrap();
        db.save_approval(ApprovalWrite::insert(&request)).await.unwrap();

        let mut bob = db.get_open_approval(&tenant, record.id).await.unwrap().unwrap();
        let mut carol = bob.clone();
        let read = bob.version;
        bob.decide("bob", Decision::Approve, None).unwrap();
        carol.decide("carol", Decision::Approve, None).unwrap();

        db.save_approval(ApprovalWrite::update(&bob, read)).await.unwrap();
        let lost = db.save_approval(ApprovalWrite::update(&carol, read)).await;
        assert!(matches!(lost, Err(StorageError::Conflict(_))));

        let stored = db.get_open_approval(&tenant, record.id).await.unwrap().unwrap();
        assert_eq!(stored.decisions.len(), 1);
        assert_eq!(stored.version, read + 1);
    }
}
