//! Core governance domain types.
//!
//! Every record handled by the platform belongs to exactly one tenant and is
//! one of a small set of [`RecordKind`]s. Status changes are driven by the
//! [`crate::workflow`] module; this module only defines the data.

mod record;
mod tenant;

pub use record::{GovernanceRecord, RecordKind, RecordStatus, Reference, Severity, TransitionRecord};
pub use tenant::TenantId;
