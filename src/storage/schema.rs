//! Database schema constants.
//!
//! Every table carries `tenant_id` and every index leads with it, so tenant
//! scoped lookups never scan other tenants' rows.

/// Governance records (incidents, risks, CAPAs, ...).
pub const CREATE_GOVERNANCE_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS governance_records (
    id UUID PRIMARY KEY,
    tenant_id VARCHAR(63) NOT NULL,
    kind VARCHAR(32) NOT NULL,
    reference VARCHAR(64) NOT NULL,
    title TEXT NOT NULL,
    status VARCHAR(32) NOT NULL,
    severity VARCHAR(16) NOT NULL,
    owner VARCHAR(255),
    attributes JSONB NOT NULL DEFAULT '{}'::jsonb,
    version BIGINT NOT NULL DEFAULT 1,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE(tenant_id, reference)
)
"#;

/// Reference sequences per (tenant, kind, year).
pub const CREATE_RECORD_SEQUENCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS record_sequences (
    tenant_id VARCHAR(63) NOT NULL,
    kind VARCHAR(32) NOT NULL,
    year INTEGER NOT NULL,
    last_value INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, kind, year)
)
"#;

/// Status history of records.
pub const CREATE_RECORD_TRANSITIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS record_transitions (
    id UUID PRIMARY KEY,
    tenant_id VARCHAR(63) NOT NULL,
    record_id UUID NOT NULL REFERENCES governance_records(id) ON DELETE CASCADE,
    from_status VARCHAR(32) NOT NULL,
    to_status VARCHAR(32) NOT NULL,
    actor VARCHAR(255) NOT NULL,
    reason TEXT NOT NULL DEFAULT '',
    occurred_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_APPROVAL_REQUESTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS approval_requests (
    id UUID PRIMARY KEY,
    tenant_id VARCHAR(63) NOT NULL,
    record_id UUID NOT NULL REFERENCES governance_records(id) ON DELETE CASCADE,
    requested_by VARCHAR(255) NOT NULL,
    required_approvals INTEGER NOT NULL,
    eligible_approvers JSONB,
    decisions JSONB NOT NULL DEFAULT '[]'::jsonb,
    state VARCHAR(16) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    resolved_at TIMESTAMPTZ
)
"#;

/// Scored audit runs; the full report is kept as JSON.
pub const CREATE_AUDIT_RESULTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS audit_results (
    id UUID PRIMARY KEY,
    tenant_id VARCHAR(63) NOT NULL,
    record_id UUID REFERENCES governance_records(id) ON DELETE SET NULL,
    template_id VARCHAR(255) NOT NULL,
    template_version INTEGER NOT NULL,
    outcome VARCHAR(16) NOT NULL,
    percentage DOUBLE PRECISION,
    report JSONB NOT NULL,
    scored_by VARCHAR(255) NOT NULL,
    scored_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_records_tenant_kind_status ON governance_records(tenant_id, kind, status);
CREATE INDEX IF NOT EXISTS idx_records_tenant_updated ON governance_records(tenant_id, updated_at);
CREATE INDEX IF NOT EXISTS idx_transitions_tenant_record ON record_transitions(tenant_id, record_id, occurred_at);
CREATE INDEX IF NOT EXISTS idx_transitions_occurred_at ON record_transitions(occurred_at);
CREATE INDEX IF NOT EXISTS idx_approvals_tenant_record_state ON approval_requests(tenant_id, record_id, state);
CREATE INDEX IF NOT EXISTS idx_audit_results_tenant_template ON audit_results(tenant_id, template_id, scored_at)
"#;

/// Optimistic-concurrency counter for approval decisions.
pub const ADD_APPROVAL_VERSION: &str = r#"
ALTER TABLE approval_requests ADD COLUMN IF NOT EXISTS version BIGINT NOT NULL DEFAULT 1
"#;

/// Returns all schema creation statements in dependency order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_GOVERNANCE_RECORDS_TABLE,
        CREATE_RECORD_SEQUENCES_TABLE,
        CREATE_RECORD_TRANSITIONS_TABLE,
        CREATE_APPROVAL_REQUESTS_TABLE,
        CREATE_AUDIT_RESULTS_TABLE,
        CREATE_INDEXES,
        ADD_APPROVAL_VERSION,
    ]
}

/// Table names in the schema.
pub mod tables {
    pub const GOVERNANCE_RECORDS: &str = "governance_records";
    pub const RECORD_SEQUENCES: &str = "record_sequences";
    pub const RECORD_TRANSITIONS: &str = "record_transitions";
    pub const APPROVAL_REQUESTS: &str = "approval_requests";
    pub const AUDIT_RESULTS: &str = "audit_results";

    /// Tables in reverse creation order, for dropping.
    pub const DROP_ORDER: [&str; 5] = [
        AUDIT_RESULTS,
        APPROVAL_REQUESTS,
        RECORD_TRANSITIONS,
        RECORD_SEQUENCES,
        GOVERNANCE_RECORDS,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_schema_statements_order() {
        let statements = all_schema_statements();
        assert_eq!(statements.len(), 7);
        // referenced by transitions, approvals and audit results
        assert!(statements[0].contains("governance_records"));
        assert!(statements[5].contains("CREATE INDEX"));
        // later changes are appended so applied part names stay valid
        assert!(statements[6].contains("ALTER TABLE approval_requests"));
    }

    #[test]
    fn test_every_table_is_tenant_scoped() {
        for statement in &all_schema_statements()[..5] {
            assert!(statement.contains("tenant_id VARCHAR(63) NOT NULL"));
        }
        for line in CREATE_INDEXES.lines().filter(|l| l.contains("(tenant_id")) {
            assert!(line.contains("ON "));
        }
    }

    #[test]
    fn test_drop_order_covers_every_table() {
        for statement in &all_schema_statements()[..5] {
            assert!(tables::DROP_ORDER
                .iter()
                .any(|table| statement.contains(&format!("EXISTS {} (", table))));
        }
    }
}
