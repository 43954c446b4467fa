//! quality_governance: multi-tenant quality and ISO governance backend.
//!
//! This library provides the record workflow and approval engines, weighted
//! audit scoring, a tenant-scoped cache with an in-memory fallback, background
//! jobs with retries and a dead-letter queue, and the HTTP API serving them.

// Core modules
pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod scoring;
pub mod service;
pub mod storage;
pub mod telemetry;
pub mod workflow;

// Re-export commonly used error types
pub use error::{DomainError, ScoringError, WorkflowError};
pub use service::{GovernanceService, ServiceError};
