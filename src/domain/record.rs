use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TenantId;
use crate::error::DomainError;

/// Kind of governance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Incident,
    Risk,
    Complaint,
    Investigation,
    Capa,
    Audit,
    Policy,
    Document,
}

impl RecordKind {
    pub const ALL: [RecordKind; 8] = [
        RecordKind::Incident,
        RecordKind::Risk,
        RecordKind::Complaint,
        RecordKind::Investigation,
        RecordKind::Capa,
        RecordKind::Audit,
        RecordKind::Policy,
        RecordKind::Document,
    ];

    /// Prefix used when formatting human-readable references.
    pub fn reference_prefix(&self) -> &'static str {
        match self {
            RecordKind::Incident => "INC",
            RecordKind::Risk => "RSK",
            RecordKind::Complaint => "CMP",
            RecordKind::Investigation => "INV",
            RecordKind::Capa => "CAPA",
            RecordKind::Audit => "AUD",
            RecordKind::Policy => "POL",
            RecordKind::Document => "DOC",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Incident => "incident",
            RecordKind::Risk => "risk",
            RecordKind::Complaint => "complaint",
            RecordKind::Investigation => "investigation",
            RecordKind::Capa => "capa",
            RecordKind::Audit => "audit",
            RecordKind::Policy => "policy",
            RecordKind::Document => "document",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.reference_prefix() == prefix)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| DomainError::UnknownKind(s.to_string()))
    }
}

/// Lifecycle status shared by all record kinds.
///
/// Each kind uses a subset; which moves are legal is decided by
/// [`crate::workflow::WorkflowEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Draft,
    Open,
    InProgress,
    UnderReview,
    PendingApproval,
    Approved,
    Rejected,
    Implemented,
    Verified,
    Closed,
    Cancelled,
}

impl RecordStatus {
    pub const ALL: [RecordStatus; 11] = [
        RecordStatus::Draft,
        RecordStatus::Open,
        RecordStatus::InProgress,
        RecordStatus::UnderReview,
        RecordStatus::PendingApproval,
        RecordStatus::Approved,
        RecordStatus::Rejected,
        RecordStatus::Implemented,
        RecordStatus::Verified,
        RecordStatus::Closed,
        RecordStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Draft => "draft",
            RecordStatus::Open => "open",
            RecordStatus::InProgress => "in_progress",
            RecordStatus::UnderReview => "under_review",
            RecordStatus::PendingApproval => "pending_approval",
            RecordStatus::Approved => "approved",
            RecordStatus::Rejected => "rejected",
            RecordStatus::Implemented => "implemented",
            RecordStatus::Verified => "verified",
            RecordStatus::Closed => "closed",
            RecordStatus::Cancelled => "cancelled",
        }
    }

    /// Closed and Cancelled records never move again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Closed | RecordStatus::Cancelled)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| DomainError::UnknownStatus(s.to_string()))
    }
}

/// Severity rating attached to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(DomainError::UnknownSeverity(s.to_string())),
        }
    }
}

/// Human-readable record reference such as `INC-2026-00042`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub kind: RecordKind,
    pub year: i32,
    pub sequence: u32,
}

impl Reference {
    pub fn new(kind: RecordKind, year: i32, sequence: u32) -> Self {
        Self {
            kind,
            year,
            sequence,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{:05}",
            self.kind.reference_prefix(),
            self.year,
            self.sequence
        )
    }
}

impl FromStr for Reference {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::InvalidReference(s.to_string());
        let mut parts = s.trim().splitn(3, '-');
        let prefix = parts.next().ok_or_else(invalid)?;
        let year = parts.next().ok_or_else(invalid)?;
        let sequence = parts.next().ok_or_else(invalid)?;

        let kind = RecordKind::from_prefix(prefix).ok_or_else(invalid)?;
        if year.len() != 4 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let sequence: u32 = sequence.parse().map_err(|_| invalid())?;
        if sequence == 0 {
            return Err(invalid());
        }
        Ok(Self::new(kind, year, sequence))
    }
}

/// A tenant-scoped governance record (incident, risk, CAPA, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceRecord {
    pub id: Uuid,
    pub tenant: TenantId,
    pub kind: RecordKind,
    pub reference: String,
    pub title: String,
    pub status: RecordStatus,
    pub severity: Severity,
    #[serde(default)]
    pub owner: Option<String>,
    /// Free-form attributes; workflow guards read fields such as `root_cause`.
    #[serde(default = "empty_object")]
    pub attributes: serde_json::Value,
    /// Incremented on every status change.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl GovernanceRecord {
    /// Creates a new draft record. The reference is assigned by the store.
    pub fn draft(
        tenant: TenantId,
        kind: RecordKind,
        title: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(DomainError::EmptyTitle);
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            tenant,
            kind,
            reference: String::new(),
            title,
            status: RecordStatus::Draft,
            severity: Severity::default(),
            owner: None,
            attributes: empty_object(),
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Replaces the attributes. Only JSON objects are accepted.
    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Result<Self, DomainError> {
        if !attributes.is_object() {
            return Err(DomainError::AttributesNotObject);
        }
        self.attributes = attributes;
        Ok(self)
    }

    /// Returns a non-empty string attribute.
    pub fn text_attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Returns a numeric attribute.
    pub fn number_attribute(&self, name: &str) -> Option<f64> {
        self.attributes.get(name).and_then(|v| v.as_f64())
    }

    /// Year component used for reference allocation.
    pub fn reference_year(&self) -> i32 {
        self.created_at.year()
    }
}

/// One entry of a record's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: Uuid,
    pub record_id: Uuid,
    pub tenant: TenantId,
    pub from: RecordStatus,
    pub to: RecordStatus,
    pub actor: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::parse("acme").unwrap()
    }

    #[test]
    fn test_reference_format() {
        let reference = Reference::new(RecordKind::Incident, 2026, 42);
        assert_eq!(reference.to_string(), "INC-2026-00042");

        let capa = Reference::new(RecordKind::Capa, 2025, 123456);
        assert_eq!(capa.to_string(), "CAPA-2025-123456");
    }

    #[test]
    fn test_reference_parse() {
        let parsed: Reference = "CAPA-2026-00007".parse().unwrap();
        assert_eq!(parsed, Reference::new(RecordKind::Capa, 2026, 7));

        assert!("XYZ-2026-00001".parse::<Reference>().is_err());
        assert!("INC-26-00001".parse::<Reference>().is_err());
        assert!("INC-2026-00000".parse::<Reference>().is_err());
        assert!("INC-2026".parse::<Reference>().is_err());
    }

    #[test]
    fn test_status_roundtrip_names() {
        for status in RecordStatus::ALL {
            assert_eq!(status.as_str().parse::<RecordStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_kind_parse_is_case_insensitive() {
        assert_eq!("CAPA".parse::<RecordKind>().unwrap(), RecordKind::Capa);
        assert!("widget".parse::<RecordKind>().is_err());
    }

    #[test]
    fn test_draft_record_defaults() {
        let record = GovernanceRecord::draft(tenant(), RecordKind::Risk, "Supplier failure").unwrap();
        assert_eq!(record.status, RecordStatus::Draft);
        assert_eq!(record.version, 1);
        assert_eq!(record.severity, Severity::Medium);
        assert!(record.attributes.is_object());
    }

    #[test]
    fn test_draft_rejects_blank_title() {
        assert!(GovernanceRecord::draft(tenant(), RecordKind::Risk, "   ").is_err());
    }

    #[test]
    fn test_attribute_accessors() {
        let record = GovernanceRecord::draft(tenant(), RecordKind::Incident, "Spill")
            .unwrap()
            .with_attributes(serde_json::json!({
                "root_cause": "  valve fatigue ",
                "blank": "  ",
                "residual_score": 4.5
            }))
            .unwrap();

        assert_eq!(record.text_attribute("root_cause"), Some("valve fatigue"));
        assert_eq!(record.text_attribute("blank"), None);
        assert_eq!(record.number_attribute("residual_score"), Some(4.5));
        assert!(record.clone().with_attributes(serde_json::json!([1])).is_err());
    }
}
