//! Metrics module for Prometheus-based monitoring.
//!
//! Covers HTTP traffic, workflow transitions, approvals, audit scores, the
//! tenant cache and the background job queue.
//!
//! # Example
//!
//! ```ignore
//! use quality_governance::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! let collector = MetricsCollector::new();
//! collector.record_job("notify", "completed", elapsed);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics, REGISTRY};
